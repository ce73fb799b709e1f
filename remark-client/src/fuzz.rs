#![cfg(test)]

use std::{panic::AssertUnwindSafe, sync::Arc};

use bolero::generator::TypeGenerator;
use remark_mock_server::MockServer;

use crate::{
    api::{CommentId, CommentRecord, ContentUnitId, UserId},
    *,
};

macro_rules! do_tokio_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                let _ = tracing_subscriber::fmt::try_init();
            }
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_generator($gen)
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Create {
        reply_to: Option<u8>,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        text: String,
        fail: bool,
    },
    Delete {
        target: u8,
        fail: bool,
    },
    Like {
        target: u8,
        fail: bool,
    },
    ContentLike {
        fail: bool,
    },
    ToggleThread {
        target: u8,
    },
}

type Shape = Vec<(CommentId, Option<CommentId>, u64)>;

fn shape<'a>(records: impl Iterator<Item = &'a CommentRecord>) -> Shape {
    let mut res = records
        .map(|r| (r.id.clone(), r.parent_id.clone(), r.like_count))
        .collect::<Vec<_>>();
    res.sort();
    res
}

fn pick(c: &Coordinator<Arc<MockServer>>, target: u8) -> Option<CommentRecord> {
    let records = c.snapshot().to_vec();
    match records.is_empty() {
        true => None,
        false => Some(records[usize::from(target) % records.len()].clone()),
    }
}

fn check_forest(c: &Coordinator<Arc<MockServer>>) {
    let snapshot = c.snapshot();
    let forest = c.forest();
    assert_eq!(
        forest.iter().map(|n| n.subtree_len()).sum::<usize>(),
        snapshot.len()
    );
    for w in forest.windows(2) {
        assert!(w[0].record.created_at >= w[1].record.created_at);
    }
    fn walk(n: &CommentNode) {
        for w in n.children.windows(2) {
            assert!(w[0].record.created_at <= w[1].record.created_at);
        }
        for child in &n.children {
            assert_eq!(child.record.parent_id.as_ref(), Some(n.id()));
            walk(child);
        }
    }
    forest.iter().for_each(walk);
}

async fn run(c: &Coordinator<Arc<MockServer>>, op: FuzzOp) {
    let server = c.backend().clone();
    let before = c.snapshot().to_vec();
    match op {
        FuzzOp::Create {
            reply_to,
            text,
            fail,
        } => {
            let target = reply_to.and_then(|t| pick(c, t));
            if let Some(t) = &target {
                c.start_reply(t.id.clone(), t.author_id.label().to_owned());
            }
            server.fail_next(usize::from(fail));
            let invalid = text.trim().is_empty() || text.contains('\0');
            let res = c.create(&text).await;
            assert!(c.reply_target().is_none());
            match res {
                Ok(id) => {
                    assert!(!invalid && !fail);
                    let snapshot = c.snapshot();
                    let created = snapshot.get(&id).expect("created comment is in the store");
                    assert_eq!(created.parent_id, target.map(|t| t.id));
                    assert_eq!(snapshot.len(), before.len() + 1);
                }
                Err(failure) => {
                    assert!(invalid || fail);
                    assert_eq!(failure.was_rolled_back(), !invalid);
                    if let Some(restored) = &failure.restored {
                        assert_eq!(restored.to_vec(), before);
                    }
                    assert_eq!(c.snapshot().to_vec(), before);
                }
            }
        }
        FuzzOp::Delete { target, fail } => {
            let Some(target) = pick(c, target) else {
                return;
            };
            let expected = {
                let mut store = CommentStore::new();
                store.replace(before.clone()).unwrap();
                store.closure_of(&target.id).len()
            };
            server.fail_next(usize::from(fail));
            match c.delete(&target.id).await {
                Ok(removed) => {
                    assert!(!fail);
                    assert_eq!(removed, expected);
                    assert_eq!(c.snapshot().len(), before.len() - expected);
                }
                Err(failure) => {
                    assert!(fail);
                    assert!(failure.was_rolled_back());
                    assert_eq!(c.snapshot().to_vec(), before);
                }
            }
        }
        FuzzOp::Like { target, fail } => {
            let Some(target) = pick(c, target) else {
                return;
            };
            let was_liked = c.is_liked(&target.id);
            server.fail_next(usize::from(fail));
            match c.toggle_like(&target.id).await {
                Ok(liked) => {
                    assert!(!fail);
                    assert_eq!(liked, !was_liked);
                    assert_eq!(c.is_liked(&target.id), liked);
                }
                Err(failure) => {
                    assert!(fail);
                    assert_eq!(failure.kind == OperationKind::Like, !was_liked);
                    assert_eq!(c.is_liked(&target.id), was_liked);
                    assert_eq!(c.snapshot().to_vec(), before);
                }
            }
        }
        FuzzOp::ContentLike { fail } => {
            let (count, was_liked) = c.content_likes();
            server.fail_next(usize::from(fail));
            match c.toggle_content_like().await {
                Ok(liked) => {
                    assert!(!fail);
                    assert_eq!(liked, !was_liked);
                }
                Err(_) => {
                    assert!(fail);
                    assert_eq!(c.content_likes(), (count, was_liked));
                }
            }
        }
        FuzzOp::ToggleThread { target } => {
            let Some(target) = pick(c, target) else {
                return;
            };
            let was = c.is_collapsed(&target.id);
            assert_eq!(c.toggle_thread(&target.id), !was);
            assert_eq!(c.snapshot().to_vec(), before);
        }
    }
    server.fail_next(0);
}

do_tokio_test!(
    client_agrees_with_server,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..50usize),
    |ops: Vec<FuzzOp>| async move {
        let unit = ContentUnitId(String::from("fuzzed"));
        let server = Arc::new(MockServer::new());
        let session = Arc::new(ActorSession::signed_in(UserId::new("fuzzer")));
        let c = Coordinator::new(unit.clone(), server.clone(), session, CoordinatorConfig::default());
        c.hydrate().await.unwrap();
        for op in ops {
            run(&c, op).await;
            check_forest(&c);
            assert_eq!(shape(c.snapshot().records()), shape(server.comments(&unit).iter()));
            assert_eq!(c.content_likes().0, server.content_likes(&unit));
        }
    }
);
