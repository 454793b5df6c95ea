//! Durable queue driven by the running request service.

mod common;

use std::time::Duration;

use arena_core::kernel::jobs::{Job, JobMethod, JobState, JobStore, ReplyEnvelope, ReplyState};
use arena_core::kernel::{HttpVerb, MessageBroker, MockHttpClient, Subscription};
use common::*;
use test_context::test_context;

async fn next_envelope(subscription: &mut Subscription) -> ReplyEnvelope {
    let message = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("no final response")
        .expect("subscription closed");
    ReplyEnvelope::parse(&message.text()).expect("final response is an envelope")
}

#[test_context(TestHarness)]
#[tokio::test]
async fn batch_reports_every_child_once_they_finish(ctx: &TestHarness) {
    let mut done = ctx.broker.subscribe("checks.done".into()).await.unwrap();
    let children = vec![
        Job::builder()
            .method(JobMethod::Get)
            .url("http://a.test/health")
            .channel("checks.done.a")
            .build(),
        Job::builder()
            .method(JobMethod::Get)
            .url("http://b.test/health")
            .channel("checks.done.b")
            .build(),
    ];
    let (batch, children) = ctx.deps.queue.add_batch("checks.done", children).await.unwrap();

    let envelope = next_envelope(&mut done).await;
    assert_eq!(envelope.state, ReplyState::Complete);
    assert_eq!(envelope.job_id, batch.id.to_string());
    let child_data = envelope.child_data.unwrap();
    assert_eq!(child_data.len(), 2);
    assert!(child_data.iter().all(ReplyEnvelope::is_success));

    for child in children {
        let job = ctx.jobs.find(child.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Complete);
        assert!(job.finished_at >= job.started_at);
    }
}

#[tokio::test]
async fn one_failed_child_fails_the_batch() {
    let http = MockHttpClient::new()
        .with_error("b.test", "connection refused")
        .healthy();
    let ctx = TestHarness::with_http(http).await.unwrap();
    let mut done = ctx.broker.subscribe("checks.done".into()).await.unwrap();

    let children = ["http://a.test/health", "http://b.test/health"]
        .into_iter()
        .map(|url| Job::request(JobMethod::Get, url))
        .collect();
    ctx.deps.queue.add_batch("checks.done", children).await.unwrap();

    let envelope = next_envelope(&mut done).await;
    assert_eq!(envelope.state, ReplyState::Fail);
    let failed: Vec<_> = envelope
        .child_data
        .unwrap()
        .into_iter()
        .filter(|child| !child.is_success())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].url, "http://b.test/health");
}

#[tokio::test]
async fn post_jobs_resolve_placeholders_and_publish_the_reply() {
    let http = MockHttpClient::new().with_response(
        "/score/",
        r#"{"state":"complete","message":"scored","data":"42"}"#,
    );
    let ctx = TestHarness::with_http(http).await.unwrap();
    let mut replies = ctx.broker.subscribe("scores.reply".into()).await.unwrap();

    let job = Job::builder()
        .method(JobMethod::Post)
        .url("$ARENA$/score/$JOB$")
        .data(r#"{"player":"p1"}"#)
        .channel("scores.reply")
        .build();
    let job = ctx.deps.queue.add(job).await.unwrap();

    let envelope = next_envelope(&mut replies).await;
    assert_eq!(envelope.state, ReplyState::Complete);
    assert_eq!(envelope.message, "scored");
    assert_eq!(envelope.data, "42");

    let calls = ctx.http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].verb, HttpVerb::Post);
    assert_eq!(calls[0].url, format!("http://arena.test/score/{}", job.id));
    assert_eq!(calls[0].body.as_deref(), Some(r#"{"player":"p1"}"#));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn message_jobs_are_sent_once(ctx: &TestHarness) {
    let mut inbox = ctx.broker.subscribe("agent.p1.ping.request.*".into()).await.unwrap();
    let job = ctx
        .deps
        .queue
        .add(Job::message("agent.p1.ping.request.j1", "hello"))
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), inbox.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.text(), "hello");

    ctx.settle().await;
    assert_eq!(ctx.broker.messages_matching("agent.p1.ping.request.*").len(), 1);
    let job = ctx.jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Complete);
}
