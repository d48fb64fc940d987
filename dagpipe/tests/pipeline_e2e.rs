//! End-to-end pipeline runs.

use std::sync::Arc;

use anyhow::Context;
use dagpipe::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use dagpipe::errors::DagpipeError;
use dagpipe::events::{self, CollectingEventSink};
use dagpipe::graph::{Graph, Node};
use dagpipe::orchestrator::{NodeStatus, PipelineOrchestrator};
use dagpipe::provider::{ChatMessage, FnProvider, Provider, SharedProvider};
use dagpipe::registry::NodeRegistry;
use dagpipe::router::ModelRouter;
use dagpipe::state::NodeContext;
use dagpipe::testing::{CountingNode, FailingNode};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map};
use tempfile::TempDir;

fn research_write() -> Graph {
    Graph::new(vec![
        Node::new("research", "research").with_complexity(0.3),
        Node::new("write", "write")
            .with_dependency("research")
            .with_complexity(0.8),
    ])
    .unwrap()
}

fn research_write_registry() -> NodeRegistry {
    NodeRegistry::new()
        .with_fn("research", |ctx, _| {
            Ok(json!({
                "topic": ctx.require("topic")?,
                "facts": ["checkpoints", "routing"],
            }))
        })
        .with_fn("write", |ctx, _| {
            let research = ctx.require("research")?;
            let topic = research["topic"].as_str().unwrap_or_default();
            Ok(json!({"draft": format!("About {topic}")}))
        })
}

fn topic() -> [(String, serde_json::Value); 1] {
    [("topic".to_string(), json!("DagPipe"))]
}

fn tiered_router() -> ModelRouter<SharedProvider> {
    ModelRouter::new(
        FnProvider::shared(|_| Ok("low".to_string())),
        FnProvider::shared(|_| Ok("high".to_string())),
        FnProvider::shared(|_| Ok("fallback".to_string())),
    )
    .with_labels("groq", "gemini", "ollama")
}

#[tokio::test]
async fn test_research_then_write() {
    let tmp = TempDir::new().unwrap();
    let mut orchestrator =
        PipelineOrchestrator::builder(research_write(), research_write_registry())
            .with_checkpoint_dir(tmp.path())
            .build()
            .unwrap();

    let state = orchestrator.run(topic(), false).await.unwrap();

    assert_eq!(state["research"]["topic"], "DagPipe");
    assert_eq!(state["write"]["draft"], "About DagPipe");
    assert_eq!(state["topic"], "DagPipe");
    assert!(tmp.path().join("research.json").exists());
    assert!(tmp.path().join("write.json").exists());
    assert_eq!(orchestrator.status("write"), Some(NodeStatus::Success));
}

#[tokio::test]
async fn test_second_run_resumes_from_checkpoints() {
    let tmp = TempDir::new().unwrap();

    let first_research = Arc::new(CountingNode::new(json!({"topic": "DagPipe"})));
    let broken_write = Arc::new(FailingNode::always("boom"));
    let mut first = PipelineOrchestrator::builder(
        research_write(),
        NodeRegistry::new()
            .with("research", first_research.clone())
            .with("write", broken_write.clone()),
    )
    .with_checkpoint_dir(tmp.path())
    .with_max_retries(2)
    .build()
    .unwrap();

    let err = first.run(topic(), false).await.unwrap_err();
    let exhausted = match err {
        DagpipeError::RetryExhausted(e) => e,
        other => panic!("expected retry exhaustion, got {other:?}"),
    };
    assert_eq!(exhausted.node, "write");
    assert_eq!(exhausted.attempts, 2);
    assert_eq!(exhausted.last_error, "boom (call 2)");
    assert_eq!(first_research.call_count(), 1);
    assert!(tmp.path().join("research.json").exists());
    assert!(!tmp.path().join("write.json").exists());

    let second_research = Arc::new(CountingNode::new(json!({"topic": "other"})));
    let sink = Arc::new(CollectingEventSink::new());
    let mut second = PipelineOrchestrator::builder(
        research_write(),
        NodeRegistry::new()
            .with("research", second_research.clone())
            .with_fn("write", |ctx, _| Ok(json!({"from": ctx.require("research")?}))),
    )
    .with_checkpoint_dir(tmp.path())
    .with_event_sink(sink.clone())
    .build()
    .unwrap();

    let state = second.run(topic(), false).await.unwrap();

    assert_eq!(second_research.call_count(), 0);
    assert_eq!(state["write"]["from"]["topic"], "DagPipe");
    assert_eq!(second.status("research"), Some(NodeStatus::Success));
    let restored = sink.events_of_type(events::NODE_RESTORED);
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].1.as_ref().unwrap()["node"], "research");
}

#[tokio::test]
async fn test_exhaustion_stops_downstream_nodes() {
    let failing = Arc::new(FailingNode::always("nope"));
    let downstream = Arc::new(CountingNode::new(json!(null)));
    let sink = Arc::new(CollectingEventSink::new());

    let mut orchestrator = PipelineOrchestrator::builder(
        research_write(),
        NodeRegistry::new()
            .with("research", failing.clone())
            .with("write", downstream.clone()),
    )
    .with_store(Arc::new(InMemoryCheckpointStore::new()))
    .with_event_sink(sink.clone())
    .build()
    .unwrap();

    let err = orchestrator.run(topic(), false).await.unwrap_err();

    assert_eq!(failing.call_count(), 3);
    assert_eq!(downstream.call_count(), 0);
    assert!(err
        .to_string()
        .starts_with("Pipeline failed at node 'research' after 3 attempts"));
    assert_eq!(orchestrator.status("research"), Some(NodeStatus::Failed));
    assert_eq!(orchestrator.status("write"), Some(NodeStatus::Pending));
    assert_eq!(
        sink.event_types().last().map(String::as_str),
        Some(events::PIPELINE_FAILED)
    );
}

#[tokio::test]
async fn test_last_error_reaches_next_attempt() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let registry = NodeRegistry::new().with_fn("parse", move |ctx, _| {
        log.lock().push(ctx.last_error().map(ToString::to_string));
        if ctx.is_first_attempt() {
            anyhow::bail!("missing field 'title'");
        }
        Ok(json!({"title": "fixed"}))
    });
    let graph = Graph::new(vec![Node::new("parse", "parse")]).unwrap();

    let mut orchestrator = PipelineOrchestrator::builder(graph, registry)
        .with_store(Arc::new(InMemoryCheckpointStore::new()))
        .build()
        .unwrap();
    orchestrator.run(Map::new(), false).await.unwrap();

    assert_eq!(
        *seen.lock(),
        vec![None, Some("missing field 'title'".to_string())]
    );
}

#[tokio::test]
async fn test_completion_callback_order() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let log = completed.clone();

    let mut orchestrator =
        PipelineOrchestrator::builder(research_write(), research_write_registry())
            .with_store(Arc::new(InMemoryCheckpointStore::new()))
            .on_node_complete(move |id, output, _elapsed| {
                log.lock().push((id.to_string(), output.clone()));
            })
            .build()
            .unwrap();
    orchestrator.run(topic(), false).await.unwrap();

    let completed = completed.lock();
    let ids: Vec<&str> = completed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["research", "write"]);
    assert_eq!(completed[1].1["draft"], "About DagPipe");
}

#[tokio::test]
async fn test_deterministic_nodes_get_no_provider() {
    let graph = Graph::new(vec![
        Node::new("fetch", "counted").deterministic(),
        Node::new("summarise", "counted").with_dependency("fetch"),
    ])
    .unwrap();
    let counting = Arc::new(CountingNode::new(json!({"ok": true})));

    let registry = NodeRegistry::new().with("counted", counting.clone());
    let mut orchestrator = PipelineOrchestrator::builder(graph, registry)
        .with_store(Arc::new(InMemoryCheckpointStore::new()))
        .with_router(tiered_router())
        .build()
        .unwrap();
    orchestrator.run(Map::new(), false).await.unwrap();

    assert_eq!(counting.provider_seen(), vec![false, true]);
}

#[tokio::test]
async fn test_retries_escalate_then_fall_back() {
    let replies = Arc::new(Mutex::new(Vec::new()));
    let log = replies.clone();
    let mut registry = NodeRegistry::new();
    registry.register_async(
        "draft",
        move |ctx: NodeContext, provider: Option<SharedProvider>| {
            let log = log.clone();
            async move {
                let provider = provider.context("node needs a provider")?;
                let reply = provider.complete(&[ChatMessage::user("draft it")]).await?;
                log.lock().push(reply.clone());
                match ctx.attempt() {
                    0 => anyhow::bail!("answer too weak"),
                    1 => anyhow::bail!("upstream said: Rate limit exceeded"),
                    _ => Ok(json!({"reply": reply})),
                }
            }
        },
    );

    let graph =
        Graph::new(vec![Node::new("draft", "draft").with_complexity(0.6)]).unwrap();
    let sink = Arc::new(CollectingEventSink::new());
    let mut orchestrator = PipelineOrchestrator::builder(graph, registry)
        .with_store(Arc::new(InMemoryCheckpointStore::new()))
        .with_router(tiered_router())
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    let state = orchestrator.run(Map::new(), false).await.unwrap();

    assert_eq!(*replies.lock(), vec!["low", "high", "fallback"]);
    assert_eq!(state["draft"]["reply"], "fallback");
    let labels: Vec<String> = sink
        .events_of_type(events::NODE_STARTED)
        .iter()
        .filter_map(|(_, data)| data.as_ref()?["provider"].as_str().map(String::from))
        .collect();
    assert_eq!(labels, vec!["groq", "gemini", "ollama"]);
}

#[tokio::test]
async fn test_fresh_run_discards_checkpoints() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let counting = Arc::new(CountingNode::new(json!({"n": 1})));
    let graph = Graph::new(vec![Node::new("only", "counted")]).unwrap();

    let registry = NodeRegistry::new().with("counted", counting.clone());
    let mut orchestrator = PipelineOrchestrator::builder(graph, registry)
        .with_store(store.clone())
        .build()
        .unwrap();

    orchestrator.run(Map::new(), false).await.unwrap();
    orchestrator.run(Map::new(), false).await.unwrap();
    assert_eq!(counting.call_count(), 1);

    orchestrator.run(Map::new(), true).await.unwrap();
    assert_eq!(counting.call_count(), 2);
    assert_eq!(store.list().await.unwrap(), vec!["only"]);
}

#[tokio::test]
async fn test_yaml_graph_runs() {
    let graph = Graph::from_yaml_str(
        r"
nodes:
  - id: research
    fn: research
    complexity: 0.3
  - id: write
    fn: write
    depends_on: [research]
    description: Write the article
",
    )
    .unwrap();
    assert_eq!(graph.execution_order(), ["research", "write"]);

    let mut orchestrator = PipelineOrchestrator::builder(graph, research_write_registry())
        .with_store(Arc::new(InMemoryCheckpointStore::new()))
        .build()
        .unwrap();
    let state = orchestrator.run(topic(), false).await.unwrap();
    assert_eq!(state["write"]["draft"], "About DagPipe");
}
