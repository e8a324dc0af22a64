use rust_summarus::pgn::{PointerGeneratorConfig, PointerGeneratorNetwork};
use rust_summarus::pipelines::summarization::{SummarizationBatch, SummarizationInstance};
use rust_summarus::Vocabulary;
use tch::{nn, Device, Kind, Tensor};

fn network_config(use_coverage: bool, beam_size: i64) -> PointerGeneratorConfig {
    PointerGeneratorConfig {
        embedding_dim: 12,
        hidden_size: 8,
        bidirectional: Some(true),
        target_embedding_dim: None,
        projection_dim: None,
        attention_dim: None,
        max_decoding_steps: 6,
        beam_size: Some(beam_size),
        use_coverage: Some(use_coverage),
        coverage_loss_weight: Some(1.0),
        scheduled_sampling_ratio: None,
    }
}

fn sample_vocabulary() -> Vocabulary {
    Vocabulary::from_tokens(&["the", "cat", "sat", "on", "mat"])
}

fn sample_batch(vocabulary: &Vocabulary) -> anyhow::Result<SummarizationBatch> {
    let instances = [
        SummarizationInstance {
            source_tokens: vec!["the".into(), "zorblax".into(), "sat".into()],
            target_tokens: Some(vec!["the".into(), "zorblax".into()]),
        },
        SummarizationInstance {
            source_tokens: vec!["cat".into(), "on".into(), "mat".into()],
            target_tokens: Some(vec!["cat".into(), "sat".into()]),
        },
    ];
    Ok(SummarizationBatch::new(&instances, vocabulary, Device::Cpu)?)
}

#[test]
fn step_distribution_covers_the_extended_vocabulary() -> anyhow::Result<()> {
    tch::manual_seed(4);
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let network = PointerGeneratorNetwork::new(
        vs.root(),
        &network_config(false, 1),
        vocabulary.clone(),
    );
    let batch = sample_batch(&vocabulary)?;

    let mut state = network.init_decoder_state(
        &batch.source_tokens,
        &batch.source_token_ids,
        &batch.source_to_target,
    )?;
    let start_predictions = Tensor::full(
        [2],
        vocabulary.start_index(),
        (Kind::Int64, Device::Cpu),
    );
    let log_probabilities = tch::no_grad(|| network.take_step(&start_predictions, &mut state))?;

    // One distinct out-of-vocabulary source word widens the distribution by
    // one slot for the whole batch.
    assert_eq!(
        log_probabilities.size(),
        vec![2, vocabulary.size() + 1]
    );
    let sums = log_probabilities
        .exp()
        .sum_dim_intlist([-1].as_slice(), false, Kind::Float);
    for example in 0..2 {
        assert!((sums.double_value(&[example]) - 1.0).abs() < 1e-4);
    }
    Ok(())
}

#[test]
fn forward_pass_returns_loss_and_beam_predictions() -> anyhow::Result<()> {
    tch::manual_seed(11);
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let network = PointerGeneratorNetwork::new(
        vs.root(),
        &network_config(true, 3),
        vocabulary.clone(),
    );
    let batch = sample_batch(&vocabulary)?;
    let target_tokens = batch.target_tokens.as_ref().unwrap();
    let target_token_ids = batch.target_token_ids.as_ref().unwrap();

    let output = tch::no_grad(|| {
        network.forward_t(
            &batch.source_tokens,
            &batch.source_token_ids,
            &batch.source_to_target,
            Some(target_tokens),
            Some(target_token_ids),
            false,
        )
    })?;

    let loss = output.loss.unwrap().double_value(&[]);
    assert!(loss.is_finite());
    assert!(loss > 0.0);

    // Beam search: one row of hypotheses per example, sequences capped at
    // the decoding step limit.
    let prediction_size = output.predictions.size();
    assert_eq!(prediction_size[0], 2);
    assert_eq!(prediction_size[1], 3);
    assert!(prediction_size[2] <= 6);
    let log_probabilities = output.class_log_probabilities.unwrap();
    assert_eq!(log_probabilities.size(), vec![2, 3]);
    // Hypotheses are sorted by descending score.
    assert!(
        log_probabilities.double_value(&[0, 0]) >= log_probabilities.double_value(&[0, 1])
    );
    Ok(())
}

#[test]
fn training_forward_pass_requires_targets() -> anyhow::Result<()> {
    tch::manual_seed(3);
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let network = PointerGeneratorNetwork::new(
        vs.root(),
        &network_config(false, 1),
        vocabulary.clone(),
    );
    let batch = sample_batch(&vocabulary)?;

    let result = network.forward_t(
        &batch.source_tokens,
        &batch.source_token_ids,
        &batch.source_to_target,
        None,
        None,
        true,
    );
    assert!(result.is_err());
    Ok(())
}

#[test]
fn scheduled_sampling_feeds_back_model_predictions() -> anyhow::Result<()> {
    tch::manual_seed(5);
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let mut config = network_config(false, 1);
    config.scheduled_sampling_ratio = Some(1.0);
    let network = PointerGeneratorNetwork::new(vs.root(), &config, vocabulary.clone());
    let batch = sample_batch(&vocabulary)?;
    let target_tokens = batch.target_tokens.as_ref().unwrap();
    let target_token_ids = batch.target_token_ids.as_ref().unwrap();

    // With a ratio of one every training step consumes the model's own last
    // prediction, which may be an extended index, instead of the gold token.
    let output = tch::no_grad(|| {
        network.forward_t(
            &batch.source_tokens,
            &batch.source_token_ids,
            &batch.source_to_target,
            Some(target_tokens),
            Some(target_token_ids),
            true,
        )
    })?;

    let loss = output.loss.unwrap().double_value(&[]);
    assert!(loss.is_finite());
    assert!(loss > 0.0);
    assert_eq!(output.predictions.size()[0], 2);
    Ok(())
}

#[test]
fn zeroed_coverage_matches_plain_attention() -> anyhow::Result<()> {
    tch::manual_seed(7);
    let vocabulary = sample_vocabulary();

    let vs_plain = nn::VarStore::new(Device::Cpu);
    let plain_network = PointerGeneratorNetwork::new(
        vs_plain.root(),
        &network_config(false, 1),
        vocabulary.clone(),
    );
    let mut covered_config = network_config(true, 1);
    covered_config.coverage_loss_weight = Some(0.0);
    let vs_covered = nn::VarStore::new(Device::Cpu);
    let covered_network = PointerGeneratorNetwork::new(
        vs_covered.root(),
        &covered_config,
        vocabulary.clone(),
    );

    // Share all weights; the coverage projection only exists in the covered
    // network and is zeroed so that coverage cannot influence the scores.
    let source_variables = vs_plain.variables();
    tch::no_grad(|| {
        for (name, mut variable) in vs_covered.variables() {
            match source_variables.get(&name) {
                Some(source) => {
                    variable.copy_(source);
                }
                None => {
                    let _ = variable.zero_();
                }
            }
        }
    });

    let batch = sample_batch(&vocabulary)?;
    let target_tokens = batch.target_tokens.as_ref().unwrap();
    let target_token_ids = batch.target_token_ids.as_ref().unwrap();
    let forward = |network: &PointerGeneratorNetwork| {
        tch::no_grad(|| {
            network.forward_t(
                &batch.source_tokens,
                &batch.source_token_ids,
                &batch.source_to_target,
                Some(target_tokens),
                Some(target_token_ids),
                false,
            )
        })
    };

    let plain_loss = forward(&plain_network)?.loss.unwrap().double_value(&[]);
    let covered_loss = forward(&covered_network)?.loss.unwrap().double_value(&[]);
    assert!((plain_loss - covered_loss).abs() < 1e-6);
    Ok(())
}

#[test]
fn decoding_restores_copied_source_words() -> anyhow::Result<()> {
    tch::manual_seed(9);
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let network = PointerGeneratorNetwork::new(
        vs.root(),
        &network_config(false, 1),
        vocabulary.clone(),
    );
    let batch = sample_batch(&vocabulary)?;

    // "the", the copied "zorblax" slot, then the end symbol.
    let predictions = Tensor::from_slice(&[
        vocabulary.token_to_id("the"),
        vocabulary.size(),
        vocabulary.end_index(),
        vocabulary.token_to_id("cat"),
        vocabulary.token_to_id("sat"),
        vocabulary.end_index(),
    ])
    .view([2, 3]);

    let decoded = network.decode(
        &predictions,
        &batch.source_to_target,
        &batch.source_tokens_text,
    )?;

    assert_eq!(decoded[0], vec!["the".to_string(), "zorblax".to_string()]);
    assert_eq!(decoded[1], vec!["cat".to_string(), "sat".to_string()]);
    Ok(())
}

#[test]
fn decoding_rejects_unassigned_extended_indices() -> anyhow::Result<()> {
    let vocabulary = sample_vocabulary();
    let vs = nn::VarStore::new(Device::Cpu);
    let network = PointerGeneratorNetwork::new(
        vs.root(),
        &network_config(false, 1),
        vocabulary.clone(),
    );
    let batch = sample_batch(&vocabulary)?;

    // Extended index 5 slots past the vocabulary, but the first source only
    // holds a single out-of-vocabulary word.
    let predictions = Tensor::from_slice(&[
        vocabulary.size() + 5,
        vocabulary.end_index(),
        vocabulary.end_index(),
        vocabulary.end_index(),
    ])
    .view([2, 2]);

    let result = network.decode(
        &predictions,
        &batch.source_to_target,
        &batch.source_tokens_text,
    );
    assert!(result.is_err());
    Ok(())
}
