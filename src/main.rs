extern crate log;
extern crate pretty_env_logger;

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, Command};
use log::info;
use rayon::prelude::*;

use omr_grader::{
    grade_block_image, grade_submission, load_answer_keys, load_config, GradingConfig,
    ImageInput, Verdict,
};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let block_mode = matches.get_flag("block");
    let keys_path = matches
        .get_one::<String>("keys")
        .expect("answer keys path is required");
    let image_paths = matches
        .get_many::<String>("images")
        .expect("at least one image path is required")
        .map(PathBuf::from)
        .collect::<Vec<PathBuf>>();

    let mut config = match matches.get_one::<String>("config") {
        Some(config_path) => match load_config(Path::new(config_path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                exit(1);
            }
        },
        None => GradingConfig::default(),
    };
    config.debug |= matches.get_flag("debug");

    let keys = match load_answer_keys(Path::new(keys_path)) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Error loading answer keys: {}", e);
            exit(1);
        }
    };
    for (i, key) in keys.iter().enumerate() {
        if let Err(e) = key.validate(config.alternatives) {
            eprintln!("Error in answer key {}: {}", i, e);
            exit(1);
        }
    }

    let first_key = keys.first();
    if block_mode && first_key.is_none() {
        eprintln!("Error: grading a single block requires an answer key");
        exit(1);
    }

    let verdicts = image_paths
        .par_iter()
        .map(|path| {
            let input = ImageInput::Path(path.clone());
            let verdict = match first_key {
                Some(key) if block_mode => grade_block_image(&input, key, &config),
                _ => grade_submission(&input, &keys, &config),
            };
            info!("{}: {:?}", path.display(), verdict.status);
            verdict
        })
        .collect::<Vec<Verdict>>();

    for verdict in &verdicts {
        match serde_json::to_string_pretty(verdict) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing verdict: {}", e);
                exit(1);
            }
        }
    }

    if !verdicts.iter().all(Verdict::is_success) {
        exit(2);
    }
}

fn cli() -> Command {
    command!()
        .arg(arg!(-k --keys <PATH> "Path to answer keys JSON file, one key per block").required(true))
        .arg(arg!(-c --config <PATH> "Path to grading config JSON file"))
        .arg(arg!(-d --debug "Write annotated debug images next to each input"))
        .arg(arg!(-b --block "Treat each image as a single pre-cropped answer block"))
        .arg(arg!(images: <IMAGE> ... "Paths to answer sheet images").required(true))
}
