use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "threadcast-server", about = "Threadcast chat publish pipeline")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/threadcast.toml")]
    pub config: String,

    /// Seed a demo channel and run one publish cycle before idling
    #[arg(long)]
    pub demo: bool,
}
