use std::path::PathBuf;

use baselinexr_core::EstimatorKind;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser, Debug)]
#[command(name = "BASElineXR CLI")]
#[command(bin_name = "baselinexr-cli")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".baselinexr.toml",
        help = "file the yaw/north/east adjustments are kept in"
    )]
    pub adjustments: PathBuf,

    #[clap(subcommand)]
    pub mode: ModeSelect,
}

#[derive(Subcommand, Debug)]
pub enum ModeSelect {
    #[command(about = "replay a fix log through the estimator and flight mode classifier")]
    Replay(ReplayCli),

    #[command(about = "turn the scene by a yaw delta and save it")]
    Yaw(YawCli),

    #[command(about = "print the stored adjustments")]
    Show,
}

#[derive(Parser, Debug)]
pub struct ReplayCli {
    #[arg(help = "csv with columns t_ms,lat,lon,alt,vn,ve,climb")]
    pub fix_log: PathBuf,
    #[arg(long, help = "session config toml, created with defaults if missing")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "overrides the estimator chosen in the config")]
    pub estimator: Option<EstimatorArg>,
    #[arg(long, default_value_t = 90.0)]
    pub render_hz: f64,
}

#[derive(Parser, Debug)]
pub struct YawCli {
    #[arg(allow_negative_numbers = true, help = "yaw delta in degrees")]
    pub degrees: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum EstimatorArg {
    Kalman,
    Simple,
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(value: EstimatorArg) -> Self {
        match value {
            EstimatorArg::Kalman => EstimatorKind::Kalman,
            EstimatorArg::Simple => EstimatorKind::Simple,
        }
    }
}
