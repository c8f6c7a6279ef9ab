mod args;
use args::{parse_args, Commands};

mod core;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = parse_args();

    match args.command {
        Commands::Info { jar } => core::info(&args.dfs_root, &jar)?,
        Commands::Run {
            jar,
            driver,
            timeout,
            args: driver_args,
        } => {
            let status = core::run(&args.dfs_root, &jar, driver.as_deref(), timeout, &driver_args)?;
            std::process::exit(status);
        }
        Commands::Submit(submit) => {
            if !core::submit(&args.dfs_root, submit)? {
                std::process::exit(1);
            }
        }
        Commands::Install { install, minio } => core::install(&args.dfs_root, install, minio)?,
    }

    Ok(())
}
