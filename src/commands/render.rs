use clap::{Args, ValueEnum};

use vllm_provision::artifact;
use vllm_provision::collect;
use vllm_provision::defaults;
use vllm_provision::paths::Layout;
use vllm_provision::service;
use vllm_provision::Error;

use super::{ModelSourceArgs, OverrideArgs};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RenderTarget {
    /// The launch script placed in the install root
    Launcher,
    /// The system-wide help command
    Help,
    /// The systemd unit (needs --hf-model or --local-model)
    Service,
}

#[derive(Args)]
pub struct RenderArgs {
    /// Artifact to render
    pub target: RenderTarget,

    #[command(flatten)]
    pub source: ModelSourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Render an artifact from defaults plus flags to stdout. Touches nothing on the host.
pub fn run(args: RenderArgs) -> vllm_provision::Result<(String, i32)> {
    let defaults = defaults::load_defaults()?;
    let ctx = collect::collect(&defaults, &args.overrides.into_overrides(), None)?;
    let layout = Layout::resolve(&ctx, &defaults)?;

    let rendered = match args.target {
        RenderTarget::Launcher => artifact::render_launcher(&ctx, &layout)?,
        RenderTarget::Help => artifact::render_help(&ctx, &layout, &defaults)?,
        RenderTarget::Service => {
            let source = service::source_from_flags(
                args.source.hf_model.as_deref(),
                args.source.local_model.as_deref(),
            )?
            .ok_or_else(|| {
                Error::validation_missing_argument(vec![
                    "--hf-model or --local-model".to_string(),
                ])
            })?;
            service::render_unit(&ctx, &layout, &defaults, &source)?
        }
    };

    Ok((rendered.contents, 0))
}
