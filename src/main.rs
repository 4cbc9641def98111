use clap::{Parser, Subcommand};

mod commands;
mod output;
mod tty;

use commands::{check, config, install, render};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "vllm-provision")]
#[command(version = VERSION)]
#[command(about = "Provision a vLLM inference server on this Ubuntu host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full provisioning pipeline (requires root)
    Install(install::InstallArgs),
    /// Check OS, driver and GPU compute capability only
    Check(check::CheckArgs),
    /// Print a generated artifact without touching the host
    Render(render::RenderArgs),
    /// Manage the provisioning defaults file
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Render(_)) {
        return match commands::run_raw(cli.command) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
            Err(err) => {
                output::print_diagnostic(&err);
                let exit_code = output::exit_code_for_error(err.code);
                if let Err(e) = output::print_result::<serde_json::Value>(Err(err)) {
                    eprintln!("{}", e.message);
                }
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
        };
    }

    let (json_result, exit_code) = commands::run_json(cli.command);

    if let Err(err) = &json_result {
        output::print_diagnostic(err);
    }
    if let Err(e) = output::print_json_result(json_result) {
        eprintln!("{}", e.message);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
