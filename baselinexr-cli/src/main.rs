mod adjustments;
mod args;
mod config;
mod replay;

use anyhow::Result;
use args::{Cli, ModeSelect};
use baselinexr_core::{AdjustmentStore, CoordinateTransform};
use clap::Parser;
use log::LevelFilter;
use log::info;

use crate::adjustments::TomlAdjustmentStore;

fn main() -> Result<()> {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .try_init();
    let args = Cli::parse();
    let mut store = TomlAdjustmentStore::new(args.adjustments);

    match args.mode {
        ModeSelect::Replay(args) => replay::run(args, &mut store)?,
        ModeSelect::Yaw(args) => {
            // a broken file should stop us rather than be overwritten
            let adjustment = store.load()?.unwrap_or_default();
            let mut transform = CoordinateTransform::new(adjustment);
            transform.rotate_yaw(args.degrees.to_radians());
            transform.save_adjustment(&mut store)?;
            info!(
                "yaw adjustment is now {:.2} deg, saved to {:?}",
                transform.adjustment().yaw.to_degrees(),
                store.path()
            );
        }
        ModeSelect::Show => {
            let adjustment = store.load()?.unwrap_or_default();
            println!("file:  {:?}", store.path());
            println!("yaw:   {:.2} deg", adjustment.yaw.to_degrees());
            println!("north: {:.2} m", adjustment.north);
            println!("east:  {:.2} m", adjustment.east);
        }
    }
    Ok(())
}
