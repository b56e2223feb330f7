//! Unit tests for the event router and subscription filtering

use agentdeck::{EventRouter, JobEvent, JobId};
use serde_json::json;

fn chunk(job: &JobId, text: &str) -> JobEvent {
    JobEvent::Chunk {
        job: job.clone(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn tracked_ids_receive_events_in_order() {
    let router = EventRouter::new();
    let mut sub = router.subscribe();
    let job = JobId::generate();
    sub.track(job.clone());

    router.publish(chunk(&job, "Hello"));
    router.publish(chunk(&job, " world"));
    router.publish(JobEvent::Done { job: job.clone() });

    assert_eq!(sub.recv().await, Some(chunk(&job, "Hello")));
    assert_eq!(sub.recv().await, Some(chunk(&job, " world")));
    assert_eq!(sub.recv().await, Some(JobEvent::Done { job }));
}

#[tokio::test]
async fn unknown_ids_are_filtered() {
    let router = EventRouter::new();
    let mut sub = router.subscribe();
    let tracked = JobId::generate();
    let stale = JobId::generate();
    sub.track(tracked.clone());

    // A late event for a job this subscriber never registered.
    router.publish(chunk(&stale, "late"));
    router.publish(JobEvent::Done { job: tracked.clone() });

    assert_eq!(sub.recv().await, Some(JobEvent::Done { job: tracked }));
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn untrack_stops_delivery() {
    let router = EventRouter::new();
    let mut sub = router.subscribe();
    let job = JobId::generate();
    sub.track(job.clone());
    sub.untrack(&job);

    router.publish(chunk(&job, "dropped"));
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn subscribers_are_independent() {
    let router = EventRouter::new();
    let mut a = router.subscribe();
    let mut b = router.subscribe();
    let job = JobId::generate();
    a.track(job.clone());
    b.track(job.clone());

    router.publish(chunk(&job, "x"));

    assert_eq!(a.recv().await, Some(chunk(&job, "x")));
    assert_eq!(b.recv().await, Some(chunk(&job, "x")));
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    let router = EventRouter::new();
    let job = JobId::generate();

    let gone = router.subscribe();
    gone.track(job.clone());
    drop(gone);

    let mut live = router.subscribe();
    live.track(job.clone());
    router.publish(JobEvent::Done { job: job.clone() });

    assert_eq!(live.recv().await, Some(JobEvent::Done { job }));
}

#[test]
fn events_serialize_with_kind_tag() {
    let job = JobId::from("abc");
    assert_eq!(
        serde_json::to_value(chunk(&job, "hi")).unwrap(),
        json!({"kind": "chunk", "job": "abc", "text": "hi"})
    );
    assert_eq!(
        serde_json::to_value(JobEvent::Error {
            job: job.clone(),
            message: "boom".to_string(),
        })
        .unwrap(),
        json!({"kind": "error", "job": "abc", "message": "boom"})
    );
    assert_eq!(
        serde_json::to_value(JobEvent::Done { job }).unwrap(),
        json!({"kind": "done", "job": "abc"})
    );
}
