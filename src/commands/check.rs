use clap::Args;

use vllm_provision::defaults;
use vllm_provision::prereq::{self, Capabilities, SystemProbe};
use vllm_provision::utils::command::SystemRunner;

use super::CmdResult;

#[derive(Args)]
pub struct CheckArgs {}

/// Run only the prerequisite checks. Needs no root and changes nothing.
pub fn run(_args: CheckArgs) -> CmdResult<Capabilities> {
    let defaults = defaults::load_defaults()?;
    let runner = SystemRunner;
    let probe = SystemProbe::new(&runner, &defaults.prereq);
    let caps = prereq::check_prerequisites(&probe, &defaults.prereq)?;
    Ok((caps, 0))
}
