mod common;

use airquery::engine::adapter::{ContentUri, HttpContentResolver, LocalStore, SqliteStore};
use airquery::engine::provider::{create_router, ProviderState};
use airquery::{QueryContext, QueryError, Record, RunResult};
use common::{note, Note};
use std::sync::Arc;
use tokio::runtime::Runtime;

const AUTHORITY: &str = "com.example.notes";

/// A content provider on an ephemeral port, running until dropped
struct Provider {
    _runtime: Runtime,
    base_url: String,
    store: Arc<SqliteStore>,
}

fn start_provider() -> Provider {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store.ensure_table("notes", Note::schema()).unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let runtime = Runtime::new().unwrap();
    let state = ProviderState::new(AUTHORITY, store.clone());
    runtime.spawn(async move {
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    Provider {
        _runtime: runtime,
        base_url,
        store,
    }
}

fn remote_context(provider: &Provider) -> QueryContext {
    QueryContext::builder("remote")
        .resolver(HttpContentResolver::new(&provider.base_url).unwrap())
        .build()
}

fn notes_uri() -> ContentUri {
    ContentUri::parse(&format!("content://{}/notes", AUTHORITY)).unwrap()
}

#[test]
fn test_insert_and_select_through_endpoint() -> Result<(), Box<dyn std::error::Error>> {
    let provider = start_provider();
    let ctx = remote_context(&provider);

    let (outcome, payload) = ctx
        .insert_into::<Note>(notes_uri())?
        .values(vec![note("groceries", "milk"), note("chores", "laundry")])
        .run_returning()?;
    let ids = outcome.inserted_ids().expect("insert ids").to_vec();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| id.is_some_and(|id| id > 0)));
    assert_eq!(payload[0].as_ref().map(|n| n.id), ids[0]);

    let found = ctx
        .select::<Note>(notes_uri())?
        .and_where("title = ?", ["chores"])?
        .first()?
        .expect("note through endpoint");
    assert_eq!(found.body, "laundry");

    // The provider's own store saw the writes
    let cursor = provider.store.query("notes", None, None, &[], None, None)?;
    assert_eq!(cursor.count(), 2);
    Ok(())
}

#[test]
fn test_update_and_delete_through_endpoint() -> Result<(), Box<dyn std::error::Error>> {
    let provider = start_provider();
    let ctx = remote_context(&provider);

    let (_, payload) = ctx
        .insert_into::<Note>(notes_uri())?
        .values(vec![note("a", "1"), note("b", "2"), note("c", "3")])
        .run_returning()?;
    let mut notes: Vec<Note> = payload.into_iter().flatten().collect();

    notes[0].body = "edited".to_string();
    let outcome = ctx.update::<Note>(notes_uri())?.value(notes[0].clone()).run()?;
    assert_eq!(outcome, RunResult::Updated(1));

    let edited = ctx
        .select::<Note>(notes_uri())?
        .and_where("_id = ?", [notes[0].id])?
        .first()?
        .expect("edited note");
    assert_eq!(edited.body, "edited");

    let outcome = ctx
        .delete_from::<Note>(notes_uri())?
        .where_in("title", ["b", "c"])?
        .run()?;
    assert_eq!(outcome.affected(), 2);

    let left = ctx
        .select::<Note>(notes_uri())?
        .sort_asc(&["title"])
        .limit(5)
        .all()?
        .unwrap_or_default();
    assert_eq!(left.len(), 1);
    Ok(())
}

#[test]
fn test_refused_insert_stops_batch() -> Result<(), Box<dyn std::error::Error>> {
    let provider = start_provider();
    let ctx = remote_context(&provider);
    let missing = ContentUri::parse(&format!("content://{}/archive", AUTHORITY))?;

    let outcome = ctx
        .insert_into::<Note>(missing)?
        .values(vec![note("x", "y"), note("z", "w")])
        .run()?;
    assert_eq!(outcome, RunResult::InsertRejected { index: 0 });
    Ok(())
}

#[test]
fn test_unknown_endpoint_selects_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let provider = start_provider();
    let ctx = remote_context(&provider);

    let wrong_authority = ContentUri::parse("content://org.example.other/notes")?;
    assert!(ctx.select::<Note>(wrong_authority)?.all()?.is_none());

    let missing_table = ContentUri::parse(&format!("content://{}/archive", AUTHORITY))?;
    assert!(ctx.select::<Note>(missing_table)?.first()?.is_none());
    Ok(())
}

#[test]
fn test_endpoint_without_resolver() {
    let ctx = QueryContext::builder("local-only")
        .local_store(SqliteStore::in_memory().unwrap())
        .build();
    let err = ctx
        .insert_into::<Note>(notes_uri())
        .unwrap()
        .value(note("a", "b"))
        .run()
        .unwrap_err();
    assert!(matches!(err, QueryError::NoBackendConfigured(_)));
}

#[test]
fn test_concurrent_clients() -> Result<(), Box<dyn std::error::Error>> {
    let provider = start_provider();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let ctx = remote_context(&provider);
            std::thread::spawn(move || {
                ctx.insert_into::<Note>(notes_uri())
                    .and_then(|q| q.value(note(&format!("t{}", i), "b")).run())
                    .map(|outcome| outcome.affected())
            })
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().expect("client thread").unwrap(), 1);
    }

    let ctx = remote_context(&provider);
    let rows = ctx.select::<Note>(notes_uri())?.all()?.unwrap_or_default();
    assert_eq!(rows.len(), 4);
    Ok(())
}
