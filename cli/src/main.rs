use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wincanon")]
#[command(about = "Canonicalize paths on link-capable Windows filesystems", long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a path to its canonical, case-exact form
    RealPath {
        /// Path to resolve
        path: String,
        /// Do not resolve symbolic links
        #[arg(long)]
        no_links: bool,
    },
    /// Ask the filesystem for the final path of a file
    FinalPath {
        /// Path to query
        path: String,
        /// Do not follow symbolic links
        #[arg(long)]
        no_follow: bool,
    },
    /// Print the target of a symbolic link
    ReadLink {
        /// Path of the link
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run(cli)
}

#[cfg(windows)]
fn run(cli: Cli) -> anyhow::Result<()> {
    use wincanon_core::{final_path, read_link, real_path, WinPath};
    use wincanon_platform::NativeFileSystem;

    let fs = NativeFileSystem::new();
    let (input, resolved) = match &cli.command {
        Commands::RealPath { path, no_links } => {
            let parsed = WinPath::parse(path)?;
            (path.clone(), real_path(&fs, &parsed, !no_links)?)
        }
        Commands::FinalPath { path, no_follow } => {
            let parsed = WinPath::parse(path)?;
            (path.clone(), final_path(&fs, &parsed, !no_follow)?)
        }
        Commands::ReadLink { path } => (path.clone(), read_link(&fs, path)?),
    };

    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "input": input, "resolved": resolved })
        );
    } else {
        println!("{resolved}");
    }
    Ok(())
}

#[cfg(not(windows))]
fn run(cli: Cli) -> anyhow::Result<()> {
    let path = match &cli.command {
        Commands::RealPath { path, .. }
        | Commands::FinalPath { path, .. }
        | Commands::ReadLink { path } => path,
    };
    anyhow::bail!("cannot resolve {path}: no native filesystem backend on this platform");
}
