use colored::Colorize;
use linkcred::command_argument_builder;
use linkcred::handlers::{handle_sanitize, handle_scan, print_banner};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let flag = |name: &str| {
        chosen_command.get_flag(name)
            || chosen_command
                .subcommand()
                .is_some_and(|(_, sub)| sub.get_flag(name))
    };
    let quiet = flag("quiet");
    let verbose = flag("verbose");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let result = match chosen_command.subcommand() {
        Some(("scan", primary_command)) => handle_scan(primary_command, quiet, verbose).await,
        Some(("sanitize", primary_command)) => handle_sanitize(primary_command, verbose),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
