//! Lifecycle, registry, delivery, and shutdown tests for the actor runtime.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use troupe::{Actor, ActorError, ActorState, ActorSystem};
use uuid::Uuid;

const MSG: &str = "i am the lead role!";
const WAIT: Duration = Duration::from_secs(60);

fn unique_name(tag: &str) -> String {
    format!("actor_{tag}_{}", Uuid::new_v4())
}

/// Handler that counts `count` copies of [`MSG`], then signals completion.
fn counting_handler(
    count: usize,
) -> (
    impl FnOnce(Actor<String>) -> BoxFuture<'static, ()> + Send + 'static,
    oneshot::Receiver<()>,
) {
    let (done_tx, done_rx) = oneshot::channel();

    let handler = move |actor: Actor<String>| {
        async move {
            let mut seen = 0usize;
            while let Some(msg) = actor.recv().await {
                assert_eq!(msg, MSG, "receiving unexpected message");
                seen += 1;
                if seen == count {
                    let _ = done_tx.send(());
                    return;
                }
            }
        }
        .boxed()
    };

    (handler, done_rx)
}

/// Poll `probe` until it returns true or `deadline` elapses.
async fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn negative_buffer_is_rejected() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let (handler, _done) = counting_handler(1);

    let err = system
        .spawn(&ctx, &unique_name("buffer"), -1, handler, -1)
        .await
        .unwrap_err();

    assert!(matches!(err, ActorError::ChannelBuffer(-1)));
    assert!(system.is_empty());
}

#[tokio::test]
async fn single_actor_delivery() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let (handler, done) = counting_handler(3);

    let act = system
        .spawn(&ctx, &unique_name("single"), 3, handler, -1)
        .await
        .expect("create actor");

    for _ in 0..3 {
        act.send(MSG.to_string()).await.unwrap();
    }

    timeout(WAIT, done).await.expect("actor timeout").unwrap();
    ctx.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn single_actor_burst() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let burst = 42_000usize;
    let (handler, done) = counting_handler(burst);

    let act = system
        .spawn(&ctx, &unique_name("burst"), 3, handler, -1)
        .await
        .expect("create actor");

    for _ in 0..burst {
        act.send(MSG.to_string()).await.unwrap();
    }

    timeout(WAIT, done).await.expect("actor timeout").unwrap();
    ctx.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn many_producers_interleave() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let producers = 50usize;
    let per_producer = 840usize;
    let (handler, done) = counting_handler(producers * per_producer);

    let name = unique_name("fanin");
    system
        .spawn(&ctx, &name, 3, handler, -1)
        .await
        .expect("create actor");

    let mut senders = Vec::with_capacity(producers);
    for _ in 0..producers {
        let system = system.clone();
        let name = name.clone();
        senders.push(tokio::spawn(async move {
            let act = system.get::<String>(&name).expect("get actor");
            for _ in 0..per_producer {
                act.send(MSG.to_string()).await.expect("send");
            }
        }));
    }

    for sender in senders {
        sender.await.unwrap();
    }

    timeout(WAIT, done).await.expect("actor timeout").unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn messages_from_one_producer_arrive_in_order() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let (done_tx, done_rx) = oneshot::channel();

    let act = system
        .spawn(
            &ctx,
            &unique_name("order"),
            3,
            move |actor: Actor<u64>| async move {
                for expected in 0..1_000u64 {
                    assert_eq!(actor.recv().await, Some(expected));
                }
                let _ = done_tx.send(());
            },
            -1,
        )
        .await
        .expect("create actor");

    for n in 0..1_000u64 {
        act.send(n).await.unwrap();
    }

    timeout(WAIT, done_rx).await.expect("actor timeout").unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn duplicate_name_rejected_until_first_dies() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let name = unique_name("dup");

    let (first_handler, _first_done) = counting_handler(3);
    let first = system
        .spawn(&ctx, &name, 0, first_handler, -1)
        .await
        .expect("create actor");

    let (second_handler, _second_done) = counting_handler(3);
    let err = system
        .spawn(&ctx, &name, 0, second_handler, -1)
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::RegisterActor(_)));

    // The failed spawn must leave no trace: the survivor is the first actor.
    let survivor = system.get::<String>(&name).expect("get actor");
    assert_eq!(survivor.uuid(), first.uuid());

    // Once the first actor dies its name becomes reusable.
    ctx.cancel();
    first.done().await;
}

#[tokio::test]
async fn name_reusable_after_cancellation() {
    let parent = CancellationToken::new();
    let system = ActorSystem::new();
    let name = unique_name("reuse");

    let first_ctx = parent.child_token();
    let (handler, _done) = counting_handler(1);
    system
        .spawn(&first_ctx, &name, 0, handler, -1)
        .await
        .expect("create actor");

    first_ctx.cancel();

    // Deregistration runs on the dying actor's own task; retry until the
    // name frees up.
    let start = tokio::time::Instant::now();
    loop {
        let (handler, _done) = counting_handler(1);
        match system.spawn::<String, _, _>(&parent, &name, 0, handler, -1).await {
            Ok(_) => break,
            Err(ActorError::RegisterActor(_)) if start.elapsed() < WAIT => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(err) => panic!("unexpected spawn failure: {err}"),
        }
    }

    parent.cancel();
}

#[tokio::test]
async fn lookup_round_trip() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let name = unique_name("lookup");

    let (handler, done) = counting_handler(3);
    let act = system
        .spawn(&ctx, &name, 0, handler, -1)
        .await
        .expect("create actor");

    let by_name = system.get::<String>(&name).expect("get by name");
    assert_eq!(by_name.uuid(), act.uuid());

    let by_uuid = system.get_by_uuid::<String>(act.uuid()).expect("get by uuid");
    assert_eq!(by_uuid.name(), act.name());

    for _ in 0..3 {
        by_uuid.send(MSG.to_string()).await.unwrap();
    }
    timeout(WAIT, done).await.expect("actor timeout").unwrap();

    assert!(matches!(
        system.get::<String>("GARBAGE"),
        Err(ActorError::RetrieveActor)
    ));
    assert!(matches!(
        system.get_by_uuid::<String>(Uuid::new_v4()),
        Err(ActorError::RetrieveActor)
    ));
    // A lookup with the wrong message type reads as a miss.
    assert!(matches!(
        system.get::<u64>(&name),
        Err(ActorError::RetrieveActor)
    ));

    ctx.cancel();
}

#[tokio::test]
async fn send_after_cancel_returns_channel_closed() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let (handler, _done) = counting_handler(1);

    let act = system
        .spawn(&ctx, &unique_name("closed"), 0, handler, -1)
        .await
        .expect("create actor");

    ctx.cancel();

    let err = timeout(WAIT, act.send(MSG.to_string()))
        .await
        .expect("send must not block after cancel")
        .unwrap_err();
    assert!(matches!(err, ActorError::ChannelClosed));
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_closes_every_actor() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();

    let mut actors = Vec::new();
    for _ in 0..20 {
        let (handler, _done) = counting_handler(1);
        let act = system
            .spawn(&ctx, &unique_name("cleanup"), 0, handler, -1)
            .await
            .expect("create actor");
        actors.push(act);
    }

    system.cleanup();

    for act in &actors {
        let err = timeout(WAIT, act.send(MSG.to_string()))
            .await
            .expect("send must not block after cleanup")
            .unwrap_err();
        assert!(matches!(err, ActorError::ChannelClosed));
    }

    let system_probe = system.clone();
    assert!(
        wait_until(WAIT, move || system_probe.is_empty()).await,
        "registry not empty after cleanup"
    );

    // Every actor finishes its teardown and stamps both lifetimes.
    let probes = actors.clone();
    assert!(
        wait_until(WAIT, move || probes
            .iter()
            .all(|act| act.state() == ActorState::Terminated))
        .await,
        "actors not terminated after cleanup"
    );
    for act in &actors {
        let started = act.start_time().expect("start stamp");
        let ended = act.end_time().expect("end stamp");
        assert!(ended >= started);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_is_contained() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let name = unique_name("panic");

    // A healthy bystander.
    let (handler, done) = counting_handler(3);
    let bystander = system
        .spawn(&ctx, &unique_name("bystander"), 3, handler, -1)
        .await
        .expect("create actor");

    system
        .spawn(
            &ctx,
            &name,
            0,
            |_actor: Actor<String>| async move {
                panic!("actor panic error");
            },
            -1,
        )
        .await
        .expect("create actor");

    // The panicking actor must vanish from the registry within a bounded
    // settling time.
    let probe_system = system.clone();
    let probe_name = name.clone();
    assert!(
        wait_until(Duration::from_secs(10), move || matches!(
            probe_system.get::<String>(&probe_name),
            Err(ActorError::RetrieveActor)
        ))
        .await,
        "panicked actor not cleaned up"
    );

    // Other actors keep working.
    for _ in 0..3 {
        bystander.send(MSG.to_string()).await.unwrap();
    }
    timeout(WAIT, done).await.expect("actor timeout").unwrap();

    ctx.cancel();
}

// The idle tracker ticks every 10 seconds, so this needs real wall clock.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "takes 30+ seconds of wall time"]
async fn idle_grows_without_sends_and_resets_on_send() {
    let ctx = CancellationToken::new();
    let system = ActorSystem::new();
    let (handler, done) = counting_handler(1);

    let act = system
        .spawn(&ctx, &unique_name("idle"), 0, handler, -1)
        .await
        .expect("create actor");

    tokio::time::sleep(Duration::from_secs(30)).await;
    let idled = act.idle();
    assert!(
        idled >= Duration::from_secs(9),
        "idle {idled:?}, expecting >= 9s"
    );

    act.send(MSG.to_string()).await.unwrap();
    let idled = act.idle();
    assert!(
        idled < Duration::from_secs(9),
        "idle {idled:?}, expecting < 9s"
    );

    timeout(WAIT, done).await.expect("actor timeout").unwrap();
    ctx.cancel();
}
