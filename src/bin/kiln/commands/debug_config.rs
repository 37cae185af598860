//! `kiln debug-config` command

use anyhow::{Context, Result};

use crate::cli::DebugConfigArgs;
use crate::commands::GlobalArgs;
use kiln::ops::{debug_config, DebugConfigOptions};
use kiln::util::GlobalContext;

pub fn execute(args: DebugConfigArgs, global: GlobalArgs) -> Result<()> {
    let gctx = GlobalContext::new()?;

    let opts = DebugConfigOptions {
        sketch_path: args.sketch,
        fqbn: args.fqbn,
        programmer: args.programmer,
        input_dir: args.input_dir,
    };
    let config = debug_config(&gctx, &opts)?;

    if global.json {
        let json = serde_json::to_string_pretty(&config)
            .context("failed to serialize debug configuration")?;
        println!("{}", json);
    } else {
        println!("{}", config.to_text());
    }

    Ok(())
}
