//! Restart strategies observed through registered names.

mod common;

use beamline::prelude::*;
use beamline::supervisor::{self, ChildCounts};
use common::{node, say, Echo, EchoReply};
use std::time::Duration;

struct Trio;

impl Supervisor for Trio {
    type InitArg = Strategy;

    fn init(strategy: Strategy) -> SupervisorInit {
        SupervisorInit::new(
            SupervisorFlags::new(strategy).max_restarts(10),
            vec![
                ChildSpec::named::<Echo>("a", "a", ()),
                ChildSpec::named::<Echo>("b", "b", ()),
                ChildSpec::named::<Echo>("c", "c", ()),
            ],
        )
    }
}

struct Pool;

impl Supervisor for Pool {
    type InitArg = ();

    fn init(_arg: ()) -> SupervisorInit {
        SupervisorInit::new(
            SupervisorFlags::new(Strategy::SimpleOneForOne),
            vec![ChildSpec::template::<Echo>("echo")],
        )
    }
}

struct Tree;

impl Supervisor for Tree {
    type InitArg = ();

    fn init(_arg: ()) -> SupervisorInit {
        SupervisorInit::new(
            SupervisorFlags::new(Strategy::OneForOne),
            vec![
                ChildSpec::supervised::<Trio>("trio", Strategy::OneForOne),
                ChildSpec::named::<Echo>("d", "d", ()),
            ],
        )
    }
}

async fn pids(node: &Node) -> [Pid; 3] {
    [
        node.whereis("a").await.unwrap(),
        node.whereis("b").await.unwrap(),
        node.whereis("c").await.unwrap(),
    ]
}

/// Waits until `name` is registered to a pid other than `old`.
async fn replaced(node: &Node, name: &str, old: Pid) -> Pid {
    for _ in 0..200 {
        match node.whereis(name).await {
            Some(pid) if pid != old => return pid,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("{name} was not restarted");
}

#[tokio::test]
async fn test_rest_for_one_restarts_later_siblings() {
    let node = node("rest@test");
    supervisor::start::<Trio>(&node, Some("trio"), Strategy::RestForOne)
        .await
        .unwrap();
    let [a, b, c] = pids(&node).await;

    node.kill(b).await.unwrap();
    let b2 = replaced(&node, "b", b).await;
    let c2 = replaced(&node, "c", c).await;

    assert_ne!(b2, b);
    assert_ne!(c2, c);
    assert_eq!(node.whereis("a").await, Some(a));
    assert_eq!(say(&node, "c", "ping").await.unwrap(), EchoReply::Said("pong".into()));
}

#[tokio::test]
async fn test_one_for_all_restarts_everyone() {
    let node = node("all@test");
    supervisor::start::<Trio>(&node, Some("trio"), Strategy::OneForAll)
        .await
        .unwrap();
    let [a, b, c] = pids(&node).await;

    node.kill(b).await.unwrap();
    replaced(&node, "a", a).await;
    replaced(&node, "b", b).await;
    replaced(&node, "c", c).await;

    let counts = supervisor::count_children(&node, "trio").await.unwrap();
    assert_eq!(
        counts,
        ChildCounts {
            specs: 3,
            active: 3,
            supervisors: 0,
            workers: 3,
        }
    );
}

#[tokio::test]
async fn test_one_for_one_leaves_siblings_alone() {
    let node = node("one@test");
    supervisor::start::<Trio>(&node, Some("trio"), Strategy::OneForOne)
        .await
        .unwrap();
    let [a, b, c] = pids(&node).await;

    node.kill(b).await.unwrap();
    replaced(&node, "b", b).await;

    assert_eq!(node.whereis("a").await, Some(a));
    assert_eq!(node.whereis("c").await, Some(c));
}

#[tokio::test]
async fn test_simple_one_for_one_pool() {
    let node = node("pool@test");
    let pool = supervisor::start::<Pool>(&node, Some("pool"), ())
        .await
        .unwrap();

    let first = supervisor::start_child(&node, "pool", &()).await.unwrap().unwrap();
    let second = supervisor::start_child(&node, "pool", &()).await.unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(say(&node, first, "hi").await.unwrap(), EchoReply::Said("hi".into()));

    let children = supervisor::which_children(&node, "pool").await.unwrap();
    assert_eq!(children.len(), 2);

    supervisor::terminate_child(&node, "pool", first).await.unwrap();
    let counts = supervisor::count_children(&node, "pool").await.unwrap();
    assert_eq!(counts.active, 1);

    pool.stop(ExitReason::Shutdown);
    pool.wait().await;
    assert!(!node.is_process_alive(second).await);
}

#[tokio::test]
async fn test_nested_supervisor_keeps_restarts_local() {
    let node = node("tree@test");
    supervisor::start::<Tree>(&node, Some("tree"), ()).await.unwrap();
    let [a, _, _] = pids(&node).await;
    let d = node.whereis("d").await.unwrap();

    let counts = supervisor::count_children(&node, "tree").await.unwrap();
    assert_eq!(
        counts,
        ChildCounts {
            specs: 2,
            active: 2,
            supervisors: 1,
            workers: 1,
        }
    );

    let children = supervisor::which_children(&node, "tree").await.unwrap();
    assert_eq!(children[0].id, "trio");
    assert_eq!(children[0].child_type, ChildType::Supervisor);
    let inner = children[0].pid.unwrap();

    // A worker under the nested supervisor is handled there.
    node.kill(a).await.unwrap();
    replaced(&node, "a", a).await;
    assert_eq!(node.whereis("d").await, Some(d));

    // A sibling of the nested supervisor leaves it alone.
    node.kill(d).await.unwrap();
    replaced(&node, "d", d).await;
    let children = supervisor::which_children(&node, "tree").await.unwrap();
    assert_eq!(children[0].pid, Some(inner));
    assert_eq!(say(&node, "a", "ping").await.unwrap(), EchoReply::Said("pong".into()));
}
