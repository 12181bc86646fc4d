use clap::{arg, command};
use linkcred_core::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("linkcred")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("linkcred")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Log pipeline decisions (overridden by RUST_LOG)")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("scan")
                .about(
                    "Resolve the links on a page and fetch their assessments. Each links file \
                is one pass over the same page session.",
                )
                .arg(
                    arg!(-s --"service" <URL>)
                        .required(false)
                        .help("Base URL of the link service (overrides the config file)")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-p --"page" <URL>)
                        .required(true)
                        .help("The page the links were found on")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-l --"links-file" <PATH>)
                        .required(false)
                        .help("Newline-delimited file of raw hrefs; repeat for further passes")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(clap::ArgAction::Append)
                        .conflicts_with("html"),
                )
                .arg(
                    arg!(--"html" <PATH>)
                        .required(false)
                        .help("Harvest hrefs from a saved HTML document instead of fetching the page")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("Path to a JSON config file")
                        .default_value(DEFAULT_CONFIG_PATH),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(--"no-pacing")
                        .required(false)
                        .help("Do not pause between client-side redirect batches")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-b --"batch-size" <N>)
                        .required(false)
                        .help("Links per service call and per client-side batch")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-t --"timeout" <SECS>)
                        .required(false)
                        .help("HTTP request timeout in seconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"max-hops" <N>)
                        .required(false)
                        .help("Give up a client-side chase after this many redirects")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"user-agent" <AGENT>)
                        .required(false)
                        .help("User-Agent sent while chasing redirects"),
                )
                .arg(keep_query_arg()),
        )
        .subcommand(
            command!("sanitize")
                .about("Print the canonical form of each link without contacting any service")
                .arg(
                    arg!(-p --"page" <URL>)
                        .required(true)
                        .help("The page the links were found on")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("Path to a JSON config file (for the query allow-list)")
                        .default_value(DEFAULT_CONFIG_PATH),
                )
                .arg(keep_query_arg())
                .arg(arg!([LINK] ... "Raw hrefs to sanitize").required(true)),
        )
}

fn keep_query_arg() -> clap::Arg {
    arg!(-k --"keep-query" <RULE>)
        .required(false)
        .help("Keep query parameters for a host, e.g. youtube.com=v,t (repeatable)")
        .action(clap::ArgAction::Append)
}
