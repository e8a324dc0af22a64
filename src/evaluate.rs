// Copyright 2019 Ilya Gusev
// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

extern crate tch;

use rust_summarus::pipelines::evaluation::{evaluate, EvaluationConfig};
use rust_summarus::RustSummarusError;
use tch::Device;

fn parse_count(value: &str) -> Result<usize, RustSummarusError> {
    value.parse::<usize>().map_err(|_| {
        RustSummarusError::InvalidConfigurationError(format!(
            "expected a positive integer, got {}",
            value
        ))
    })
}

pub fn main() -> Result<(), RustSummarusError> {
    let args: Vec<_> = std::env::args().collect();
    assert!(
        args.len() >= 3,
        "usage: {} model_dir test_path [--metric rouge|bleu|all] [--batch-size N] [--max-count N] [--report-every N]",
        args[0].as_str()
    );

    let model_dir = &args[1];
    let test_path = &args[2];
    let mut config = EvaluationConfig::default();
    let mut remaining = args[3..].iter();
    while let Some(flag) = remaining.next() {
        let value = remaining.next().ok_or_else(|| {
            RustSummarusError::InvalidConfigurationError(format!("missing value for {}", flag))
        })?;
        match flag.as_str() {
            "--metric" => config.metric = value.parse()?,
            "--batch-size" => config.batch_size = parse_count(value)?,
            "--max-count" => config.max_count = Some(parse_count(value)?),
            "--report-every" => config.report_every = parse_count(value)?,
            _ => {
                return Err(RustSummarusError::InvalidConfigurationError(format!(
                    "unknown flag {}",
                    flag
                )))
            }
        }
    }

    let report = evaluate(model_dir, test_path, &config, Device::cuda_if_available())?;

    println!("Count: {}", report.count);
    if let Some(bleu) = report.bleu {
        println!("BLEU: {}", bleu);
    }
    if let Some(rouge) = report.rouge {
        println!("ROUGE: {:?}", rouge);
    }
    Ok(())
}
