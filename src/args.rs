use clap::Parser;
use rtc_fanout::config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rtc-fanout")]
#[command(version)]
#[command(about = "Serve one live H.264 stream to many WebRTC viewers", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/rtc-fanout.toml")]
    pub config: PathBuf,

    /// HTTP bind address
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port for signaling
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Annex-B H.264 file streamed in a loop
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Frames per second for the file source
    #[arg(long, default_value = "30")]
    pub fps: u32,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}
