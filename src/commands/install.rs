use clap::Args;

use vllm_provision::defaults;
use vllm_provision::deps::HttpDownloader;
use vllm_provision::orchestrator::{self, InstallOptions, RunSummary, ServiceChoice, Toolkit};
use vllm_provision::prereq::{self, SystemProbe};
use vllm_provision::prompt::{NoPrompt, Prompter};
use vllm_provision::service;
use vllm_provision::utils::command::SystemRunner;

use super::{CmdResult, ModelSourceArgs, OverrideArgs};
use crate::tty::{self, TerminalPrompter};

#[derive(Args)]
pub struct InstallArgs {
    /// Accept defaults and confirm replacements without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Reinstall the engine package even if it is already present
    #[arg(long)]
    pub upgrade: bool,

    /// Register the boot-time service without asking
    #[arg(long, conflicts_with = "no_service")]
    pub service: bool,

    /// Skip service registration
    #[arg(long)]
    pub no_service: bool,

    #[command(flatten)]
    pub source: ModelSourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

pub fn run(args: InstallArgs) -> CmdResult<RunSummary> {
    prereq::require_root()?;
    let defaults = defaults::load_defaults()?;

    let source = service::source_from_flags(
        args.source.hf_model.as_deref(),
        args.source.local_model.as_deref(),
    )?;
    let choice = if args.no_service {
        ServiceChoice::Skip
    } else if args.service || source.is_some() {
        ServiceChoice::Register
    } else {
        ServiceChoice::Ask
    };

    let options = InstallOptions {
        overrides: args.overrides.into_overrides(),
        assume_yes: args.yes,
        upgrade: args.upgrade,
        service: choice,
        source,
    };

    let runner = SystemRunner;
    let probe = SystemProbe::new(&runner, &defaults.prereq);
    let downloader = HttpDownloader;
    let mut terminal = TerminalPrompter;
    let mut silent = NoPrompt;
    let prompter: &mut dyn Prompter = if args.yes {
        &mut silent
    } else {
        if !tty::is_stdin_tty() {
            tty::status("stdin is not a terminal; answers are read line by line");
        }
        &mut terminal
    };

    let mut kit = Toolkit {
        runner: &runner,
        probe: &probe,
        downloader: &downloader,
        prompter,
        defaults: &defaults,
    };

    let summary = orchestrator::install(&options, &mut kit)?;
    Ok((summary, 0))
}
