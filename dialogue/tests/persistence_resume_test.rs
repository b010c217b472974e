//! Checkpoint and resume integration test: runs experiments against a JSON
//! folder and an in-memory store, then reopens them.

mod common;

use std::path::Path;

use common::{default_roster, scene, scripted_roster, test_config, ScriptedPersona, NAMES};
use dialogue::persistence::{CONVERSATION_FILE, ROUNDS_FILE, SUMMARY_FILE, UNDERSTANDING_FILE};
use dialogue::{
    Checkpoint, Experiment, ExperimentConfig, JsonDirStore, KnowledgeInjection, LogStore,
    MemoryStore,
};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────

fn open_dir(
    config: &ExperimentConfig,
    dir: &Path,
    resume: bool,
) -> dialogue::ExperimentResult<Experiment> {
    let (roster, _) = default_roster();
    Experiment::open(
        config,
        roster,
        scene(config),
        Box::new(JsonDirStore::new(dir)),
        resume,
    )
}

fn checkpoint_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("checkpoint-round-"))
        .collect();
    names.sort();
    names
}

// ── JSON folder ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_writes_record_files_and_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("exp");
    let mut config = test_config(4, 2);
    config.save_interval = 2;
    config.group_chat_interval = 0;

    let mut experiment = open_dir(&config, &dir, false).unwrap();
    experiment.run().await.unwrap();

    for file in [ROUNDS_FILE, UNDERSTANDING_FILE, CONVERSATION_FILE, SUMMARY_FILE] {
        assert!(dir.join(file).exists(), "missing {}", file);
    }
    assert_eq!(
        checkpoint_files(&dir),
        vec!["checkpoint-round-2.json", "checkpoint-round-4.json"]
    );

    let json = std::fs::read_to_string(dir.join("checkpoint-round-4.json")).unwrap();
    let checkpoint = Checkpoint::from_json(&json).unwrap();
    assert_eq!(checkpoint.current_round, 4);
    assert_eq!(checkpoint.total_rounds_recorded, 4);
    assert_eq!(checkpoint.total_understanding_records, 8);
    assert_eq!(checkpoint.personas, NAMES.to_vec());

    let rounds: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join(ROUNDS_FILE)).unwrap()).unwrap();
    assert_eq!(rounds.as_array().unwrap().len(), 4);
    assert_eq!(rounds[0]["type"], "pair");
}

#[tokio::test]
async fn test_existing_records_require_resume() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("exp");
    let config = test_config(1, 1);

    open_dir(&config, &dir, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    let err = open_dir(&config, &dir, false).unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_resume_continues_after_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("exp");
    let mut config = test_config(4, 2);
    config.save_interval = 2;
    config.group_chat_interval = 0;

    open_dir(&config, &dir, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    config.rounds = 2;
    let mut resumed = open_dir(&config, &dir, true).unwrap();
    assert_eq!(resumed.next_round(), 4);
    let summary = resumed.run().await.unwrap();
    assert_eq!(summary.start_round, 4);
    assert_eq!(summary.rounds_completed, 2);
    assert_eq!(summary.final_round, 6);

    let rounds: Vec<u32> = resumed
        .log()
        .rounds()
        .iter()
        .map(|r| r.round_number)
        .collect();
    assert_eq!(rounds, vec![1, 2, 3, 4, 5, 6]);

    let ids: Vec<u64> = resumed
        .log()
        .dialogue_summary()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, (1..=12).collect::<Vec<u64>>());

    // Round 5 uses the first pair again
    let round5 = &resumed.log().rounds()[4];
    assert_eq!(round5.participants, vec!["Isabella", "Maria"]);
    assert!(checkpoint_files(&dir).contains(&"checkpoint-round-6.json".to_string()));
}

#[tokio::test]
async fn test_resume_discards_records_newer_than_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("exp");
    let mut config = test_config(3, 1);
    config.save_interval = 2;
    config.group_chat_interval = 0;

    open_dir(&config, &dir, false)
        .unwrap()
        .run()
        .await
        .unwrap();
    // Record files cover round 3, but its checkpoint never landed
    std::fs::remove_file(dir.join("checkpoint-round-3.json")).unwrap();

    config.rounds = 1;
    let mut resumed = open_dir(&config, &dir, true).unwrap();
    assert_eq!(resumed.next_round(), 2);
    assert_eq!(resumed.log().rounds().len(), 2);
    assert_eq!(resumed.log().understanding().len(), 2);
    assert!(resumed
        .log()
        .conversation()
        .values()
        .flatten()
        .all(|e| e.round <= 2));

    resumed.run().await.unwrap();
    let ids: Vec<u64> = resumed
        .log()
        .dialogue_summary()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_resume_rejects_lost_records() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("exp");
    let config = test_config(2, 1);

    open_dir(&config, &dir, false)
        .unwrap()
        .run()
        .await
        .unwrap();
    std::fs::write(dir.join(UNDERSTANDING_FILE), "[]").unwrap();

    let err = open_dir(&config, &dir, true).unwrap_err();
    assert!(err.is_persistence());
}

#[test]
fn test_resume_without_records_starts_fresh() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(1, 1);
    let experiment = open_dir(&config, &tmp.path().join("missing"), true).unwrap();
    assert_eq!(experiment.next_round(), 0);
}

// ── In-memory store ──────────────────────────────────────────────────

#[tokio::test]
async fn test_resume_rejects_different_roster() {
    let config = test_config(1, 1);
    let store = MemoryStore::new();
    let (roster, _) = default_roster();
    Experiment::open(&config, roster, scene(&config), Box::new(store.clone()), false)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(store.load().unwrap().is_some());

    let reordered = ["Maria", "Isabella", "Carmen", "Tamara"];
    let (roster, _) =
        scripted_roster(reordered.iter().map(|n| ScriptedPersona::new(n)).collect());
    let err =
        Experiment::open(&config, roster, scene(&config), Box::new(store), true).unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_resume_reapplies_past_injection() {
    let mut config = test_config(2, 1);
    config.injection = Some(KnowledgeInjection {
        trigger_round: 1,
        personas: vec!["Maria".to_string()],
        text: "The festival moved to Friday.".to_string(),
    });
    let store = MemoryStore::new();
    let (roster, _) = default_roster();
    Experiment::open(&config, roster, scene(&config), Box::new(store.clone()), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    let (roster, _) = default_roster();
    let resumed =
        Experiment::open(&config, roster, scene(&config), Box::new(store), true).unwrap();
    let context = resumed.injector().get_context("Maria");
    assert_eq!(context.matches("The festival moved to Friday.").count(), 1);
}

#[tokio::test]
async fn test_failed_flush_keeps_records_and_rerun_continues() {
    let mut config = test_config(2, 1);
    config.save_interval = 1;
    let store = MemoryStore::new();
    let (roster, _) = default_roster();
    let mut experiment =
        Experiment::open(&config, roster, scene(&config), Box::new(store.clone()), false).unwrap();

    store.set_failing(true);
    let err = experiment.run().await.unwrap_err();
    assert!(err.is_persistence());
    assert_eq!(experiment.next_round(), 1);
    assert_eq!(experiment.log().rounds().len(), 1);
    assert!(store.checkpoints().is_empty());

    store.set_failing(false);
    let summary = experiment.run().await.unwrap();
    assert_eq!(summary.final_round, 2);
    let saved: Vec<u32> = store.checkpoints().iter().map(|c| c.current_round).collect();
    assert_eq!(saved, vec![2]);
    assert_eq!(store.saved().unwrap().rounds.len(), 2);
}

#[tokio::test]
async fn test_failed_final_flush_is_retried() {
    let config = test_config(1, 1);
    let store = MemoryStore::new();
    let (roster, _) = default_roster();
    let mut experiment =
        Experiment::open(&config, roster, scene(&config), Box::new(store.clone()), false).unwrap();

    store.set_failing(true);
    assert!(experiment.run().await.is_err());

    store.set_failing(false);
    let summary = experiment.run().await.unwrap();
    assert_eq!(summary.rounds_completed, 0);
    assert_eq!(summary.final_round, 1);
    let saved: Vec<u32> = store.checkpoints().iter().map(|c| c.current_round).collect();
    assert_eq!(saved, vec![1]);
}
