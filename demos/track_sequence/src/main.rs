use std::path::PathBuf;

use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};

use posetrack::{
    config::PipelineConfig,
    run::{expand_jobs, prepare_jobs, run_all},
};

#[derive(FromArgs, Debug)]
/// Track an object through video sequences and report pose accuracy.
struct Args {
    /// data root followed by its sequences, e.g. "data/obj seq-1 seq-2"; repeatable
    #[argh(option)]
    data_dir: Vec<String>,

    /// sfm output directory of the object, one per --data-dir
    #[argh(option)]
    sfm_dir: Vec<PathBuf>,

    /// optional json file overriding the default configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of threads to use
    #[argh(option, short = 'n', default = "4")]
    num_threads: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads)
        .build_global()?;

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    let jobs = expand_jobs(&args.data_dir, &args.sfm_dir)?;
    if jobs.is_empty() {
        println!("No sequences given");
        return Ok(());
    }

    // every input is checked before the first frame of any sequence
    let prepared = prepare_jobs(&jobs, &config)?;

    let total_frames = prepared.iter().map(|p| p.num_frames()).sum::<usize>();
    println!(
        "Tracking {} sequences, {} frames",
        jobs.len(),
        total_frames
    );

    let pb = ProgressBar::new(total_frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} ({eta})")?
            .progress_chars("##>-"),
    );

    let results = run_all(prepared, &config, |_, _| pb.inc(1));
    pb.finish_and_clear();

    let mut num_failed = 0;
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(report) => {
                println!("== {} ==", job.name());
                print!("{}", report.summary);
            }
            Err(e) => {
                println!("== {} == failed: {e}", job.name());
                num_failed += 1;
            }
        }
    }

    if num_failed > 0 {
        log::error!("{num_failed} of {} sequences failed", jobs.len());
        std::process::exit(1);
    }

    Ok(())
}
