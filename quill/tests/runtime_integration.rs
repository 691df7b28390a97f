use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quill::prelude::*;
use quill::{BlockStore, BoxFuture, SqliteStore, VecChunkStream, quill_history};

#[derive(Debug)]
struct EchoProvider;

impl ChatProvider for EchoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::from("anthropic")
    }

    fn stream<'a>(
        &'a self,
        request: quill::StreamRequest,
    ) -> BoxFuture<'a, Result<ChunkStream<'a>, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            if request.secret.expose().ends_with("expired") {
                return Err(ProviderError::authentication("expired key"));
            }

            let last = request
                .history
                .last()
                .map(|message| message.content.clone())
                .unwrap_or_default();
            let stream: ChunkStream<'a> = Box::pin(VecChunkStream::new(vec![
                Ok(StreamChunk::TextDelta(format!("echo: {last}"))),
                Ok(StreamChunk::ToolCallStart {
                    id: "call-1".into(),
                    name: "lookup".into(),
                    args: "{}".into(),
                }),
                Ok(StreamChunk::ToolCallResult {
                    id: "call-1".into(),
                    content: "found".into(),
                }),
                Ok(StreamChunk::Done),
            ]));
            Ok(stream)
        })
    }
}

fn temp_db(prefix: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("quill-{prefix}-{unique}"))
        .join("quill.db")
}

fn config_for(path: &std::path::Path) -> QuillConfig {
    QuillConfig::from_toml_str(&format!(
        r#"
        [store]
        backend = "sqlite"
        path = "{}"

        [observability]
        hooks = "tracing"

        [providers.anthropic]
        strategy = "priority"
        max_failures_before_disable = 1
        "#,
        path.display()
    ))
    .expect("config should parse")
}

#[tokio::test]
async fn configured_runtime_runs_a_turn_and_persists_to_sqlite() {
    let path = temp_db("turn");
    let config = config_for(&path);

    let mut providers = ProviderRegistry::new();
    providers.register(EchoProvider);
    let runtime = build_runtime(&config, providers)
        .await
        .expect("runtime should build");

    runtime
        .keys
        .add_key(
            NewApiKey::new("anthropic", "sk-ant-expired")
                .with_id("old")
                .with_priority(0),
        )
        .await
        .expect("old key should be added");
    runtime
        .keys
        .add_key(
            NewApiKey::new("anthropic", "sk-ant-current")
                .with_id("new")
                .with_priority(1),
        )
        .await
        .expect("new key should be added");

    let history = quill_history![
        system => "Be brief.",
        user => "ping",
    ];
    let result = runtime
        .runner
        .run_turn(turn("anthropic", "claude-haiku", "msg-1", history), TurnControls::new())
        .await
        .expect("turn should succeed on the second key");

    assert_eq!(result.key_id, KeyId::from("new"));
    assert_eq!(result.key_attempts, 2);
    assert_eq!(result.outcome, StreamOutcome::Completed);
    assert_eq!(result.blocks[0].content, "echo: ping");
    assert_eq!(result.blocks[1].content, "found");

    let expired = runtime
        .keys
        .get_key(&KeyId::from("old"))
        .await
        .expect("old key should load");
    assert_eq!(expired.status, KeyStatus::Error);

    let summary = runtime
        .keys
        .usage_summary(&ProviderId::from("anthropic"))
        .await
        .expect("summary should load");
    assert_eq!(summary.total_requests, 2);
    assert_eq!(summary.successful_requests, 1);
    assert_eq!(summary.error_count, 1);

    drop(runtime);
    let reopened = Arc::new(SqliteStore::new(&path).expect("database should reopen"));
    let stored = reopened
        .load_blocks(&MessageId::from("msg-1"))
        .await
        .expect("blocks should load");
    assert_eq!(stored, result.blocks);
    assert!(stored.iter().all(|block| block.status == BlockStatus::Success));
}

#[tokio::test]
async fn tripped_key_is_skipped_by_the_next_turn() {
    let path = temp_db("skip");
    let config = config_for(&path);

    let mut providers = ProviderRegistry::new();
    providers.register(EchoProvider);
    let runtime = build_runtime(&config, providers)
        .await
        .expect("runtime should build");
    for (id, secret, priority) in [("a", "sk-a-expired", 0), ("b", "sk-b", 1)] {
        runtime
            .keys
            .add_key(
                NewApiKey::new("anthropic", secret)
                    .with_id(id)
                    .with_priority(priority),
            )
            .await
            .expect("key should be added");
    }

    for message_id in ["msg-1", "msg-2"] {
        runtime
            .runner
            .run_turn(
                turn("anthropic", "claude-haiku", message_id, vec![user_message("hi")]),
                TurnControls::new(),
            )
            .await
            .expect("turn should succeed");
    }

    let tripped = runtime
        .keys
        .get_key(&KeyId::from("a"))
        .await
        .expect("key should load");
    assert_eq!(tripped.usage.total_requests, 1, "tripped key was retried");
    assert!(
        runtime
            .selector
            .is_in_cooldown(&KeyId::from("a"))
            .await
            .expect("cooldown check should work")
    );
}
