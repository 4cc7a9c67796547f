use super::*;
use crate::sandbox::OutputLine;
use crate::state::test_helpers::{
    MockBehavior, MockConnector, MockLlm, MockSandboxProvider, test_chat, test_execution, test_settings,
};
use std::sync::atomic::Ordering;
use tokio::sync::Notify;

const CODE_REPLY: &str = "Run this:\n```python\nprint(1)\n```";

async fn chat_with(llm: MockLlm) -> (ChatOrchestrator, Arc<MockConnector>) {
    let connector = MockConnector::new(llm);
    let provider = MockSandboxProvider::new(MockBehavior::default());
    let chat = test_chat(connector.clone(), test_settings("g", "e"), provider).await;
    (chat, connector)
}

fn contents(snapshot: &ChatSnapshot) -> Vec<(Role, &str)> {
    snapshot.messages.iter().map(|m| (m.role, m.content.as_str())).collect()
}

// =========================================================================
// session lifecycle
// =========================================================================

#[tokio::test]
async fn missing_key_leaves_chat_uninitialized() {
    let connector = MockConnector::new(MockLlm::default());
    let provider = MockSandboxProvider::new(MockBehavior::default());
    let chat = test_chat(connector.clone(), test_settings("", "e"), provider).await;

    let snapshot = chat.snapshot().await;
    assert!(snapshot.session_id.is_none());
    assert_eq!(snapshot.error.as_deref(), Some(MISSING_KEY_MESSAGE));
    assert_eq!(connector.connects(), 0);

    assert_eq!(chat.begin_send("hi").await.err(), Some(ChatError::NotInitialized));
    let snapshot = chat.snapshot().await;
    assert_eq!(snapshot.error.as_deref(), Some(NOT_INITIALIZED_MESSAGE));
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn new_chat_uses_default_system_prompt() {
    let (chat, connector) = chat_with(MockLlm::default()).await;
    let snapshot = chat.snapshot().await;
    assert!(snapshot.session_id.is_some());
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.system_prompt, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn set_system_prompt_rebuilds_session_and_keeps_messages() {
    let (chat, connector) = chat_with(MockLlm::streaming(&["ok"])).await;
    chat.begin_send("first").await.unwrap().run().await;
    let before = chat.snapshot().await.session_id;

    chat.set_system_prompt("Answer in one word.").await;
    let snapshot = chat.snapshot().await;
    assert_ne!(snapshot.session_id, before);
    assert_eq!(snapshot.system_prompt, "Answer in one word.");
    assert_eq!(snapshot.messages.len(), 2);

    chat.begin_send("second").await.unwrap().run().await;
    let calls = connector.llm.chat_calls();
    assert_eq!(calls[1].0, "Answer in one word.");
    assert_eq!(calls[1].1, vec![ChatMessage::user("second")]);
}

// =========================================================================
// send
// =========================================================================

#[tokio::test]
async fn chunks_accumulate_into_reply() {
    let (chat, connector) = chat_with(MockLlm::streaming(&["Hel", "lo"])).await;

    chat.begin_send("  hi  ").await.unwrap().run().await;

    let snapshot = chat.snapshot().await;
    assert_eq!(contents(&snapshot), vec![(Role::User, "hi"), (Role::Model, "Hello")]);
    assert!(!snapshot.streaming);
    assert!(snapshot.error.is_none());

    let calls = connector.llm.chat_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, DEFAULT_SYSTEM_PROMPT);
    assert_eq!(calls[0].1, vec![ChatMessage::user("hi")]);
}

#[tokio::test]
async fn session_history_carries_into_next_send() {
    let (chat, connector) = chat_with(MockLlm::streaming(&["Hello"])).await;

    chat.begin_send("hi").await.unwrap().run().await;
    chat.begin_send("again").await.unwrap().run().await;

    let calls = connector.llm.chat_calls();
    assert_eq!(
        calls[1].1,
        vec![ChatMessage::user("hi"), ChatMessage::model("Hello"), ChatMessage::user("again")]
    );
    assert_eq!(chat.snapshot().await.messages.len(), 4);
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let (chat, _) = chat_with(MockLlm::default()).await;
    assert_eq!(chat.begin_send("   ").await.err(), Some(ChatError::EmptyMessage));
    assert!(chat.snapshot().await.messages.is_empty());
}

#[tokio::test]
async fn second_send_while_streaming_is_busy() {
    let gate = Arc::new(Notify::new());
    let llm = MockLlm { gate: Some(gate.clone()), ..MockLlm::streaming(&["done"]) };
    let (chat, _) = chat_with(llm).await;

    let pending = chat.begin_send("one").await.unwrap();
    let snapshot = chat.snapshot().await;
    assert!(snapshot.streaming);
    assert_eq!(contents(&snapshot), vec![(Role::User, "one"), (Role::Model, "")]);

    assert_eq!(chat.begin_send("two").await.err(), Some(ChatError::Busy));

    gate.notify_one();
    pending.run().await;
    let snapshot = chat.snapshot().await;
    assert!(!snapshot.streaming);
    assert_eq!(snapshot.messages.len(), 2);
}

#[tokio::test]
async fn stream_error_replaces_placeholder() {
    let llm = MockLlm { stream_error: Some("quota exceeded".into()), ..MockLlm::streaming(&["par"]) };
    let (chat, _) = chat_with(llm).await;

    chat.begin_send("hi").await.unwrap().run().await;

    let snapshot = chat.snapshot().await;
    let expected = "An error occurred with the Gemini API: API request failed: quota exceeded. Check your key and permissions.";
    assert_eq!(snapshot.messages[1].content, format!("**Error:** {expected}"));
    assert_eq!(snapshot.error.as_deref(), Some(expected));
    assert!(!snapshot.streaming);
}

#[tokio::test]
async fn failed_start_is_reported() {
    let llm = MockLlm { start_error: Some("connection refused".into()), ..MockLlm::default() };
    let (chat, _) = chat_with(llm).await;

    chat.begin_send("hi").await.unwrap().run().await;

    let snapshot = chat.snapshot().await;
    assert!(snapshot.messages[1].content.starts_with("**Error:** "));
    assert!(snapshot.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn stalled_stream_times_out() {
    let llm = MockLlm { hang: true, ..MockLlm::streaming(&["partial"]) };
    let (chat, _) = chat_with(llm).await;

    chat.begin_send("hi").await.unwrap().run().await;

    let snapshot = chat.snapshot().await;
    assert!(!snapshot.streaming);
    assert!(snapshot.error.unwrap().contains("timed out after 1s"));
}

#[tokio::test]
async fn failed_reply_is_not_added_to_history() {
    let llm = MockLlm { stream_error: Some("boom".into()), ..MockLlm::streaming(&["x"]) };
    let (chat, connector) = chat_with(llm).await;

    chat.begin_send("one").await.unwrap().run().await;
    chat.begin_send("two").await.unwrap().run().await;

    assert_eq!(connector.llm.chat_calls()[1].1, vec![ChatMessage::user("two")]);
}

#[tokio::test]
async fn feed_advances_on_every_chunk() {
    let (chat, _) = chat_with(MockLlm::streaming(&["a", "b", "c"])).await;
    let before = chat.feed().revision();

    chat.begin_send("hi").await.unwrap().run().await;

    // placeholder + three chunks + finish
    assert!(chat.feed().revision() >= before + 5);
}

// =========================================================================
// reset
// =========================================================================

#[tokio::test]
async fn reset_mid_stream_discards_the_reply() {
    let gate = Arc::new(Notify::new());
    let llm = MockLlm { gate: Some(gate.clone()), ..MockLlm::streaming(&["late"]) };
    let (chat, connector) = chat_with(llm).await;

    let pending = chat.begin_send("hi").await.unwrap();
    chat.reset().await;
    gate.notify_one();
    pending.run().await;

    let snapshot = chat.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.streaming);
    assert!(snapshot.error.is_none());

    let next = chat.begin_send("fresh").await.unwrap();
    gate.notify_one();
    next.run().await;
    assert_eq!(connector.llm.chat_calls().last().unwrap().1, vec![ChatMessage::user("fresh")]);
}

#[tokio::test]
async fn reset_aborts_the_upstream_stream() {
    let connector = MockConnector::new(MockLlm { hang: true, ..MockLlm::streaming(&["partial"]) });
    let settings = test_settings("g", "e");
    let execution = test_execution(MockSandboxProvider::new(MockBehavior::default()), settings.clone());
    let chat = ChatOrchestrator::new(connector.clone(), settings, execution, ChangeFeed::new(), Duration::from_secs(60)).await;

    chat.send("hi").await.unwrap();
    for _ in 0..200 {
        if chat.snapshot().await.messages.get(1).is_some_and(|m| m.content == "partial") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(chat.snapshot().await.streaming);

    chat.reset().await;

    let dropped = &connector.llm.stream_dropped;
    for _ in 0..200 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(dropped.load(Ordering::SeqCst));
    let snapshot = chat.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.streaming);
}

#[tokio::test]
async fn reset_clears_execution_records() {
    let (chat, _) = chat_with(MockLlm::streaming(&[CODE_REPLY])).await;
    chat.begin_send("code please").await.unwrap().run().await;
    chat.run_block(BlockId::new(1, 1)).await.unwrap();

    chat.reset().await;

    let snapshot = chat.snapshot().await;
    assert!(snapshot.records.is_empty());
    assert!(snapshot.messages.is_empty());
}

// =========================================================================
// run_block
// =========================================================================

#[tokio::test]
async fn run_block_executes_code_part() {
    let connector = MockConnector::new(MockLlm::streaming(&[CODE_REPLY]));
    let provider = MockSandboxProvider::new(MockBehavior { lines: vec![OutputLine::stdout("1")], ..MockBehavior::default() });
    let chat = test_chat(connector, test_settings("g", "e"), provider.clone()).await;
    chat.begin_send("code please").await.unwrap().run().await;

    let block = BlockId::new(1, 1);
    chat.run_block(block).await.unwrap();

    let mut record = None;
    for _ in 0..200 {
        let snapshot = chat.snapshot().await;
        if let Some(r) = snapshot.records.get("1-1").filter(|r| !r.running) {
            record = Some(r.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("run finished");
    assert_eq!(record.output, "1\n");
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(provider.writes.lock().unwrap()[0], ("script.py".to_string(), "print(1)".to_string()));
}

#[tokio::test]
async fn run_block_rejects_non_code_positions() {
    let (chat, _) = chat_with(MockLlm::streaming(&[CODE_REPLY])).await;
    chat.begin_send("code please").await.unwrap().run().await;

    for block in [BlockId::new(1, 0), BlockId::new(0, 0), BlockId::new(1, 5), BlockId::new(9, 0)] {
        assert_eq!(chat.run_block(block).await.err(), Some(ChatError::BlockNotFound(block)));
    }
}

#[tokio::test]
async fn run_block_without_sandbox_key_sets_banner() {
    let connector = MockConnector::new(MockLlm::streaming(&[CODE_REPLY]));
    let provider = MockSandboxProvider::new(MockBehavior::default());
    let chat = test_chat(connector, test_settings("g", ""), provider.clone()).await;
    chat.begin_send("code please").await.unwrap().run().await;

    let record = chat.run_block(BlockId::new(1, 1)).await.unwrap();

    assert_eq!(record.error, "E2B API Key not configured.");
    assert!(!record.running);
    assert_eq!(chat.snapshot().await.error.as_deref(), Some(MISSING_KEY_BANNER));
    assert_eq!(provider.provisions(), 0);
}
