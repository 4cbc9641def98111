use clap::Args;

use vllm_provision::collect::Overrides;

pub type CmdResult<T> = vllm_provision::Result<(T, i32)>;

/// Server options accepted on the command line; each skips its prompt.
#[derive(Args, Default, Debug, Clone)]
pub struct OverrideArgs {
    /// Service account name
    #[arg(long, value_name = "NAME")]
    pub account: Option<String>,

    /// Install root (home of the service account)
    #[arg(long, value_name = "PATH")]
    pub install_root: Option<String>,

    /// Bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port
    #[arg(long)]
    pub port: Option<String>,

    /// Fraction of GPU memory the engine may use, in (0, 1]
    #[arg(long, value_name = "FRACTION")]
    pub gpu_memory_utilization: Option<String>,

    /// Number of GPUs to shard the model across
    #[arg(long, value_name = "N")]
    pub tensor_parallel_size: Option<String>,

    /// Maximum sequence length ("auto" lets the engine decide)
    #[arg(long, value_name = "TOKENS")]
    pub max_model_len: Option<String>,

    /// Numeric precision (auto, float16, bfloat16, ...)
    #[arg(long)]
    pub dtype: Option<String>,
}

impl OverrideArgs {
    pub fn into_overrides(self) -> Overrides {
        Overrides {
            account: self.account,
            install_root: self.install_root,
            host: self.host,
            port: self.port,
            gpu_memory_utilization: self.gpu_memory_utilization,
            tensor_parallel_size: self.tensor_parallel_size,
            max_model_len: self.max_model_len,
            dtype: self.dtype,
        }
    }
}

/// Model source flags shared by `install` and `render service`.
#[derive(Args, Default, Debug, Clone)]
pub struct ModelSourceArgs {
    /// Serve a Hugging Face model id
    #[arg(long, value_name = "ID", conflicts_with = "local_model")]
    pub hf_model: Option<String>,

    /// Serve a model from a local directory (made world-readable on install)
    #[arg(long, value_name = "DIR")]
    pub local_model: Option<String>,
}

pub mod check;
pub mod config;
pub mod install;
pub mod render;

pub(crate) fn run_raw(command: crate::Commands) -> vllm_provision::Result<(String, i32)> {
    match command {
        crate::Commands::Render(args) => render::run(args),
        _ => Err(vllm_provision::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support raw output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (vllm_provision::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Install(args) => dispatch!(args, install),
        crate::Commands::Check(args) => dispatch!(args, check),
        crate::Commands::Config(args) => dispatch!(args, config),

        // Render prints the artifact itself
        crate::Commands::Render(_) => {
            let err = vllm_provision::Error::validation_invalid_argument(
                "output_mode",
                "Render command uses raw output mode",
                None,
                None,
            );
            crate::output::map_cmd_result_to_json::<serde_json::Value>(Err(err))
        }
    }
}
