//! Cross-component turn pipeline tests

use std::sync::Arc;

use engram::topic::GENERAL_TOPIC;
use engram::{Error, ExternalFragments, FactCategory, LexiconModel, Role, Store};

mod common;
use common::{ScriptedModel, UnavailableModel, engine_over_store, engine_with_model};

fn no_fragments() -> ExternalFragments {
    ExternalFragments::default()
}

#[tokio::test]
async fn turn_appends_user_and_assistant_messages_in_order() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    let session = engine.continue_or_create().unwrap();

    engine
        .send_turn(&session.id, "will it rain tomorrow?", &no_fragments())
        .await
        .unwrap();
    engine
        .send_turn(&session.id, "and the day after?", &no_fragments())
        .await
        .unwrap();

    let messages = engine.load_session(&session.id, None).unwrap().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "will it rain tomorrow?");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[2].content, "and the day after?");
    assert_eq!(messages[3].role, Role::Assistant);

    for pair in messages.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn first_turn_auto_titles_the_session() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    let session = engine.continue_or_create().unwrap();
    assert_eq!(session.title, "New Conversation");

    engine
        .send_turn(&session.id, "Hey, can you help me with my resume?", &no_fragments())
        .await
        .unwrap();

    let updated = engine
        .list_sessions()
        .unwrap()
        .into_iter()
        .find(|s| s.id == session.id)
        .unwrap();
    assert_eq!(updated.title, "Hey, can you help me with my resume?");
}

#[tokio::test]
async fn same_topic_changes_only_on_first_turn() {
    let model = ScriptedModel::new([("weather", 0.9), ("weather", 0.9), ("weather", 0.9)]);
    let (engine, _llm) = engine_with_model(Arc::new(model));
    let session = engine.continue_or_create().unwrap();

    let mut changes = Vec::new();
    for text in ["will it rain?", "how cold is it?", "and tomorrow?"] {
        let outcome = engine.send_turn(&session.id, text, &no_fragments()).await.unwrap();
        changes.push(outcome.topic_changed);
        assert_eq!(outcome.current_topic.as_deref(), Some("weather"));
    }
    assert_eq!(changes, vec![true, false, false]);
}

#[tokio::test]
async fn weather_then_cooking_shifts_topic_once() {
    let model = ScriptedModel::new([
        ("weather", 0.9),
        ("weather", 0.85),
        ("weather", 0.9),
        ("food", 0.9),
    ]);
    let (engine, _llm) = engine_with_model(Arc::new(model));
    let session = engine.continue_or_create().unwrap();

    for text in ["will it rain?", "how about sunday?", "should I bring an umbrella?"] {
        engine.send_turn(&session.id, text, &no_fragments()).await.unwrap();
    }

    let outcome = engine
        .send_turn(&session.id, "what should I cook tonight?", &no_fragments())
        .await
        .unwrap();

    assert!(outcome.topic_changed);
    assert_eq!(outcome.current_topic.as_deref(), Some("food"));
    assert_eq!(outcome.recent_topics_summary.len(), 1);
    assert!(outcome.recent_topics_summary[0].starts_with("weather"));
    assert!(outcome.recent_topics_summary[0].contains("3 messages"));
}

#[tokio::test]
async fn recent_topics_never_exceed_capacity() {
    let model = ScriptedModel::new([
        ("weather", 0.9),
        ("food", 0.9),
        ("travel", 0.9),
        ("sports", 0.9),
        ("finance", 0.9),
    ]);
    let (engine, _llm) = engine_with_model(Arc::new(model));
    let session = engine.continue_or_create().unwrap();

    let mut last = None;
    for text in ["one", "two", "three", "four", "five"] {
        last = Some(engine.send_turn(&session.id, text, &no_fragments()).await.unwrap());
    }

    let outcome = last.unwrap();
    assert_eq!(outcome.recent_topics_summary.len(), 3);
    assert_eq!(outcome.current_topic.as_deref(), Some("finance"));
}

#[tokio::test]
async fn reset_phrase_clears_current_topic() {
    let model = ScriptedModel::new([("weather", 0.9), ("food", 0.9)]);
    let (engine, _llm) = engine_with_model(Arc::new(model));
    let session = engine.continue_or_create().unwrap();

    engine.send_turn(&session.id, "will it rain?", &no_fragments()).await.unwrap();

    let reset = engine
        .send_turn(&session.id, "let's switch to a new topic", &no_fragments())
        .await
        .unwrap();
    assert!(!reset.topic_changed);
    assert!(reset.current_topic.is_none());
    assert_eq!(reset.recent_topics_summary.len(), 1);
    assert!(reset.recent_topics_summary[0].starts_with("weather"));

    // The next substantive message starts a fresh topic
    let next = engine
        .send_turn(&session.id, "pasta ideas for dinner?", &no_fragments())
        .await
        .unwrap();
    assert!(next.topic_changed);
    assert_eq!(next.current_topic.as_deref(), Some("food"));
}

#[tokio::test]
async fn programmatic_reset_matches_spoken_phrase() {
    let model = ScriptedModel::new([("weather", 0.9)]);
    let (engine, _llm) = engine_with_model(Arc::new(model));
    let session = engine.continue_or_create().unwrap();

    engine.send_turn(&session.id, "will it rain?", &no_fragments()).await.unwrap();

    assert!(engine.reset_topic(&session.id).unwrap());
    assert!(!engine.reset_topic(&session.id).unwrap());

    assert!(matches!(engine.reset_topic("ghost"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn unavailable_classifier_degrades_to_general() {
    let (engine, _llm) = engine_with_model(Arc::new(UnavailableModel));
    let session = engine.continue_or_create().unwrap();

    let outcome = engine
        .send_turn(&session.id, "tell me about the weather", &no_fragments())
        .await
        .unwrap();

    assert_eq!(outcome.current_topic.as_deref(), Some(GENERAL_TOPIC));
    let messages = engine.load_session(&session.id, None).unwrap().unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn new_chat_preserves_previous_sessions() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    let first = engine.continue_or_create().unwrap();
    engine.send_turn(&first.id, "hello there", &no_fragments()).await.unwrap();

    for _ in 0..3 {
        engine.new_chat().unwrap();
    }

    let sessions = engine.list_sessions().unwrap();
    assert_eq!(sessions.len(), 4);

    let old = engine.load_session(&first.id, None).unwrap().unwrap();
    assert_eq!(old.len(), 2);

    // The current pointer moved to the newest chat
    let current = engine.session_manager().current_session_id().unwrap().unwrap();
    assert_ne!(current, first.id);
}

#[tokio::test]
async fn delete_session_cascades_but_keeps_facts() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    let session = engine.continue_or_create().unwrap();

    engine.send_turn(&session.id, "will it rain?", &no_fragments()).await.unwrap();
    engine
        .add_fact("prefers short answers", FactCategory::Preference, 0.9)
        .unwrap();

    engine.delete_session(&session.id).unwrap();

    assert!(engine.load_session(&session.id, None).unwrap().is_none());
    assert!(engine.session_manager().current_session_id().unwrap().is_none());
    assert_eq!(engine.list_facts().unwrap().len(), 1);

    // Deleting twice is a no-op
    engine.delete_session(&session.id).unwrap();
}

#[tokio::test]
async fn load_unknown_session_is_none_not_error() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    assert!(engine.load_session("from-another-device", None).unwrap().is_none());
}

#[tokio::test]
async fn turn_against_unknown_session_is_not_found() {
    let (engine, _llm) = engine_with_model(Arc::new(LexiconModel));
    let err = engine
        .send_turn("ghost", "hello", &no_fragments())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn topic_context_survives_engine_restart() {
    let store = Store::in_memory().unwrap();

    let model = ScriptedModel::new([("weather", 0.9), ("weather", 0.9)]);
    let (engine, _llm) = engine_over_store(store.clone(), Arc::new(model));
    let session = engine.continue_or_create().unwrap();
    engine.send_turn(&session.id, "will it rain?", &no_fragments()).await.unwrap();
    drop(engine);

    // A fresh engine rehydrates the tracker from the store: the second
    // weather turn continues the persisted topic instead of starting over
    let model = ScriptedModel::new([("weather", 0.9)]);
    let (engine, _llm) = engine_over_store(store, Arc::new(model));
    let outcome = engine
        .send_turn(&session.id, "still raining?", &no_fragments())
        .await
        .unwrap();

    assert!(!outcome.topic_changed);
    assert_eq!(outcome.current_topic.as_deref(), Some("weather"));
    assert!(outcome.recent_topics_summary.is_empty());
}

#[tokio::test]
async fn payload_is_deterministic_for_identical_state() {
    let model_a = ScriptedModel::new([("weather", 0.9)]);
    let (engine_a, llm_a) = engine_with_model(Arc::new(model_a));
    let session_a = engine_a.continue_or_create().unwrap();
    engine_a.send_turn(&session_a.id, "will it rain?", &no_fragments()).await.unwrap();

    let model_b = ScriptedModel::new([("weather", 0.9)]);
    let (engine_b, llm_b) = engine_with_model(Arc::new(model_b));
    let session_b = engine_b.continue_or_create().unwrap();
    engine_b.send_turn(&session_b.id, "will it rain?", &no_fragments()).await.unwrap();

    let payloads_a = llm_a.payloads.lock().unwrap();
    let payloads_b = llm_b.payloads.lock().unwrap();
    assert_eq!(payloads_a[0], payloads_b[0]);
    assert_eq!(payloads_a[0].user_text(), Some("will it rain?"));
}

#[tokio::test]
async fn payload_respects_total_budget_with_oversized_inputs() {
    let (engine, llm) = engine_with_model(Arc::new(LexiconModel));
    let session = engine.continue_or_create().unwrap();

    for i in 0..40 {
        engine
            .add_fact(
                &format!("fact number {i}: {}", "x".repeat(200)),
                FactCategory::Other,
                1.0,
            )
            .unwrap();
    }

    let fragments = ExternalFragments {
        personality: Some("p".repeat(5000)),
        emotion: Some("e".repeat(5000)),
        knowledge: Some("k".repeat(50_000)),
    };
    engine.send_turn(&session.id, "hello", &fragments).await.unwrap();

    let payloads = llm.payloads.lock().unwrap();
    let total = payloads[0].total_chars();
    assert!(total <= 6000, "payload {total} chars exceeds the total budget");
}

#[tokio::test]
async fn degraded_store_still_serves_turns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engram.db");
    std::fs::create_dir(&path).unwrap();

    let store = Store::open(&path).unwrap();
    assert!(store.degraded());

    let (engine, _llm) = engine_over_store(store, Arc::new(LexiconModel));
    assert!(engine.degraded());

    let session = engine.continue_or_create().unwrap();
    engine.send_turn(&session.id, "hello out there", &no_fragments()).await.unwrap();

    // The turn checkpointed a flat backup next to the intended db path
    let backup = path.with_extension("backup.json");
    let raw = std::fs::read_to_string(backup).unwrap();
    assert!(raw.contains("hello out there"));
}
