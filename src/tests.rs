use crate::access::{AccessContext, BookSearch, ReadStatus};
use crate::clock::FixedClock;
use crate::config::{Config, SyncConfig};
use crate::db::{
    ApiKey, Database, Library, ReadList, ReadProgress, Series, StoredBook, Thumbnail, User,
};
use crate::sync::{ON_DECK_READ_LIST_ID, Page, PageRequest, SyncPointBook, SyncService};
use std::sync::Arc;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn service_at(db: &Database, ts: i64) -> SyncService {
    SyncService::new(db.clone(), Arc::new(FixedClock(ts)))
}

fn service(db: &Database) -> SyncService {
    service_at(db, 1_000)
}

fn create_user(db: &Database, id: &str) {
    let user = User {
        id: id.to_string(),
        username: format!("user-{}", id),
        created_at: 1,
    };
    db.create_user(&user).unwrap();
}

fn create_library(db: &Database, id: &str, is_public: bool) {
    let lib = Library {
        id: id.to_string(),
        name: format!("Library {}", id),
        is_public,
        owner_id: None,
        created_at: 1,
    };
    db.create_library(&lib).unwrap();
}

fn create_series(db: &Database, id: &str, library_id: &str) {
    let series = Series {
        id: id.to_string(),
        library_id: library_id.to_string(),
        name: format!("Series {}", id),
        age_rating: None,
        created_at: 1,
        updated_at: 1,
    };
    db.save_series(&series).unwrap();
}

fn book(id: &str, library_id: &str, series_id: Option<&str>, number_sort: Option<f64>) -> StoredBook {
    StoredBook {
        id: id.to_string(),
        library_id: library_id.to_string(),
        series_id: series_id.map(|s| s.to_string()),
        title: format!("Book {}", id),
        number_sort,
        file_size: 1_000,
        file_mtime: 100,
        file_hash: Some(format!("hash-{}", id)),
        metadata_updated_at: 100,
        created_at: 100,
        updated_at: 100,
    }
}

fn create_book(db: &Database, id: &str, library_id: &str) {
    db.save_book(&book(id, library_id, None, None)).unwrap();
}

fn mark_read(db: &Database, user_id: &str, book_id: &str, ts: i64) {
    db.save_progress(&ReadProgress {
        user_id: user_id.to_string(),
        book_id: book_id.to_string(),
        completed: true,
        updated_at: ts,
    })
    .unwrap();
}

fn mark_in_progress(db: &Database, user_id: &str, book_id: &str, ts: i64) {
    db.save_progress(&ReadProgress {
        user_id: user_id.to_string(),
        book_id: book_id.to_string(),
        completed: false,
        updated_at: ts,
    })
    .unwrap();
}

/// Library with one public library and a user, ready for snapshots.
fn setup(db: &Database) -> AccessContext {
    create_user(db, "user-1");
    create_library(db, "lib-1", true);
    AccessContext::for_user("user-1")
}

fn book_ids(page: &Page<SyncPointBook>) -> Vec<String> {
    page.items.iter().map(|b| b.book_id.clone()).collect()
}

fn all() -> PageRequest {
    PageRequest::of(0, 1_000)
}

// ========== SNAPSHOT BUILDER ==========

#[test]
fn create_requires_user_id() {
    let db = test_db();
    let svc = service(&db);

    let result = svc.create(&BookSearch::default(), &AccessContext::default());
    assert!(matches!(result, Err(crate::AppError::Precondition(_))));
}

#[test]
fn snapshot_captures_visible_books() {
    let db = test_db();
    let ctx = setup(&db);
    for i in 1..=3 {
        create_book(&db, &format!("book-{}", i), "lib-1");
    }

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(sp.user_id, "user-1");
    assert_eq!(sp.created_at, 1_000);
    assert!(sp.api_key_id.is_none());

    let books = svc.books_in(&sp.id, all(), false).unwrap();
    assert_eq!(books.total_elements, 3);
    let first = &books.items[0];
    assert_eq!(first.book_id, "book-1");
    assert_eq!(first.file_size, 1_000);
    assert_eq!(first.file_mtime, 100);
    assert_eq!(first.file_hash, Some("hash-book-1".to_string()));
    assert!(first.progress_updated_at.is_none());
    assert!(first.thumbnail_id.is_none());
    assert!(!first.synced);
}

#[test]
fn snapshot_ids_are_unique() {
    let db = test_db();
    let ctx = setup(&db);
    let svc = service(&db);

    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_ne!(sp1.id, sp2.id);
}

#[test]
fn snapshot_scoped_to_api_key() {
    let db = test_db();
    let ctx = setup(&db);
    db.create_api_key(&ApiKey {
        id: "key-1".to_string(),
        user_id: "user-1".to_string(),
        label: "kobo".to_string(),
        created_at: 1,
    })
    .unwrap();

    let svc = service(&db);
    let sp = svc
        .create(&BookSearch::default(), &ctx.with_api_key("key-1"))
        .unwrap();
    assert_eq!(sp.api_key_id, Some("key-1".to_string()));

    let found = svc.find_by_id(&sp.id).unwrap().unwrap();
    assert_eq!(found.api_key_id, Some("key-1".to_string()));
}

#[test]
fn snapshot_excludes_unshared_library() {
    let db = test_db();
    let ctx = setup(&db);
    create_library(&db, "lib-private", false);
    create_book(&db, "book-pub", "lib-1");
    create_book(&db, "book-priv", "lib-private");

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), ["book-pub"]);

    // Granting access makes the private library visible.
    db.grant_library_access("user-1", "lib-private").unwrap();
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(
        book_ids(&svc.books_in(&sp.id, all(), false).unwrap()),
        ["book-priv", "book-pub"]
    );
}

#[test]
fn snapshot_respects_age_rating() {
    let db = test_db();
    let mut ctx = setup(&db);
    create_series(&db, "series-kids", "lib-1");
    let mut adult = Series {
        id: "series-adult".to_string(),
        library_id: "lib-1".to_string(),
        name: "Adult".to_string(),
        age_rating: Some(18),
        created_at: 1,
        updated_at: 1,
    };
    db.save_series(&adult).unwrap();
    db.save_book(&book("book-kids", "lib-1", Some("series-kids"), Some(1.0)))
        .unwrap();
    db.save_book(&book("book-adult", "lib-1", Some("series-adult"), Some(1.0)))
        .unwrap();
    db.save_book(&book("book-loose", "lib-1", None, None)).unwrap();

    ctx.max_age_rating = Some(12);
    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    // Unrated series and series-less books stay visible.
    assert_eq!(
        book_ids(&svc.books_in(&sp.id, all(), false).unwrap()),
        ["book-kids", "book-loose"]
    );

    adult.age_rating = Some(10);
    db.save_series(&adult).unwrap();
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.books_in(&sp.id, all(), false).unwrap().total_elements, 3);
}

#[test]
fn snapshot_respects_sharing_labels() {
    let db = test_db();
    let mut ctx = setup(&db);
    create_series(&db, "series-a", "lib-1");
    create_series(&db, "series-b", "lib-1");
    db.add_series_label("series-a", "kids").unwrap();
    db.add_series_label("series-b", "staff-only").unwrap();
    db.save_book(&book("book-a", "lib-1", Some("series-a"), Some(1.0)))
        .unwrap();
    db.save_book(&book("book-b", "lib-1", Some("series-b"), Some(1.0)))
        .unwrap();

    let svc = service(&db);

    ctx.excluded_labels = vec!["staff-only".to_string()];
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), ["book-a"]);

    ctx.excluded_labels.clear();
    ctx.allowed_labels = vec!["kids".to_string()];
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), ["book-a"]);
}

#[test]
fn snapshot_applies_search_conditions() {
    let db = test_db();
    let ctx = setup(&db);
    create_library(&db, "lib-2", true);
    create_book(&db, "book-1", "lib-1");
    create_book(&db, "book-2", "lib-2");
    mark_read(&db, "user-1", "book-1", 200);

    let svc = service(&db);

    let sp = svc.create(&BookSearch::in_libraries(&["lib-2"]), &ctx).unwrap();
    assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), ["book-2"]);

    let search = BookSearch {
        read_status: Some(ReadStatus::Unread),
        ..BookSearch::default()
    };
    let sp = svc.create(&search, &ctx).unwrap();
    assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), ["book-2"]);
}

#[test]
fn snapshot_filters_by_each_read_status() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-unread", "lib-1");
    create_book(&db, "book-started", "lib-1");
    create_book(&db, "book-done", "lib-1");
    mark_in_progress(&db, "user-1", "book-started", 200);
    mark_read(&db, "user-1", "book-done", 210);

    let svc = service(&db);
    for (status, expected) in [
        (ReadStatus::Unread, "book-unread"),
        (ReadStatus::InProgress, "book-started"),
        (ReadStatus::Read, "book-done"),
    ] {
        let search = BookSearch {
            read_status: Some(status),
            ..BookSearch::default()
        };
        let sp = svc.create(&search, &ctx).unwrap();
        assert_eq!(book_ids(&svc.books_in(&sp.id, all(), false).unwrap()), [expected]);
    }
}

#[test]
fn snapshot_projects_progress_and_thumbnail() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-1", "lib-1");
    mark_read(&db, "user-1", "book-1", 250);
    db.save_thumbnail(&Thumbnail {
        id: "thumb-old".to_string(),
        book_id: "book-1".to_string(),
        selected: true,
    })
    .unwrap();
    db.save_thumbnail(&Thumbnail {
        id: "thumb-new".to_string(),
        book_id: "book-1".to_string(),
        selected: true,
    })
    .unwrap();

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    let books = svc.books_in(&sp.id, all(), false).unwrap();
    assert_eq!(books.items[0].progress_updated_at, Some(250));
    // Selecting thumb-new deselected thumb-old.
    assert_eq!(books.items[0].thumbnail_id, Some("thumb-new".to_string()));
}

#[test]
fn snapshot_captures_visible_read_lists() {
    let db = test_db();
    let ctx = setup(&db);
    create_library(&db, "lib-private", false);
    create_book(&db, "book-pub", "lib-1");
    create_book(&db, "book-priv", "lib-private");

    db.save_read_list(&ReadList {
        id: "rl-1".to_string(),
        name: "Favorites".to_string(),
        created_at: 10,
        updated_at: 20,
    })
    .unwrap();
    db.add_read_list_book("rl-1", "book-pub").unwrap();
    db.add_read_list_book("rl-1", "book-priv").unwrap();

    db.save_read_list(&ReadList {
        id: "rl-hidden".to_string(),
        name: "Hidden".to_string(),
        created_at: 10,
        updated_at: 20,
    })
    .unwrap();
    db.add_read_list_book("rl-hidden", "book-priv").unwrap();

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();

    // Membership is filtered to visible books; a list with no visible book
    // has no header.
    let members = svc
        .book_ids_by_read_list_ids(&sp.id, &["rl-1".to_string(), "rl-hidden".to_string()])
        .unwrap();
    assert_eq!(members.get("rl-1").unwrap(), &["book-pub"]);
    assert!(!members.contains_key("rl-hidden"));

    let lists = svc.read_lists_added("missing", &sp.id, all(), false).unwrap();
    let ids: Vec<_> = lists.items.iter().map(|l| l.read_list_id.clone()).collect();
    assert_eq!(ids, ["rl-1"]);
    assert_eq!(lists.items[0].name, "Favorites");
    assert_eq!(lists.items[0].updated_at, 20);
}

// ========== ON-DECK DERIVER ==========

/// Series with books 1..=count under the public library.
fn setup_series(db: &Database, series_id: &str, count: usize) {
    create_series(db, series_id, "lib-1");
    for i in 1..=count {
        db.save_book(&book(
            &format!("{}-{}", series_id, i),
            "lib-1",
            Some(series_id),
            Some(i as f64),
        ))
        .unwrap();
    }
}

fn on_deck_books(svc: &SyncService, sync_point_id: &str) -> Vec<String> {
    svc.book_ids_by_read_list_ids(sync_point_id, &[ON_DECK_READ_LIST_ID.to_string()])
        .unwrap()
        .remove(ON_DECK_READ_LIST_ID)
        .unwrap_or_default()
}

#[test]
fn on_deck_selects_first_unread() {
    let db = test_db();
    let ctx = setup(&db);
    setup_series(&db, "s1", 3);
    mark_read(&db, "user-1", "s1-1", 200);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp.id, &ctx, None).unwrap(), 1);
    assert_eq!(on_deck_books(&svc, &sp.id), ["s1-2"]);
}

#[test]
fn on_deck_skips_series_with_in_progress_book() {
    let db = test_db();
    let ctx = setup(&db);
    setup_series(&db, "s1", 3);
    mark_read(&db, "user-1", "s1-1", 200);
    mark_in_progress(&db, "user-1", "s1-2", 210);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp.id, &ctx, None).unwrap(), 0);
    assert!(on_deck_books(&svc, &sp.id).is_empty());
}

#[test]
fn on_deck_skips_unstarted_and_finished_series() {
    let db = test_db();
    let ctx = setup(&db);
    setup_series(&db, "s-unstarted", 2);
    setup_series(&db, "s-finished", 2);
    mark_read(&db, "user-1", "s-finished-1", 200);
    mark_read(&db, "user-1", "s-finished-2", 210);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp.id, &ctx, None).unwrap(), 0);

    // No books inserted means no header either.
    let lists = svc.read_lists_added("missing", &sp.id, all(), false).unwrap();
    assert!(lists.is_empty());
}

#[test]
fn on_deck_breaks_number_ties_by_book_id() {
    let db = test_db();
    let ctx = setup(&db);
    create_series(&db, "s1", "lib-1");
    db.save_book(&book("s1-read", "lib-1", Some("s1"), Some(1.0))).unwrap();
    db.save_book(&book("s1-z", "lib-1", Some("s1"), Some(2.0))).unwrap();
    db.save_book(&book("s1-a", "lib-1", Some("s1"), Some(2.0))).unwrap();
    mark_read(&db, "user-1", "s1-read", 200);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    svc.add_on_deck(&sp.id, &ctx, None).unwrap();
    assert_eq!(on_deck_books(&svc, &sp.id), ["s1-a"]);
}

#[test]
fn on_deck_header_dated_by_most_recent_read() {
    let db = test_db();
    let ctx = setup(&db);
    setup_series(&db, "s1", 2);
    setup_series(&db, "s2", 2);
    mark_read(&db, "user-1", "s1-1", 300);
    mark_read(&db, "user-1", "s2-1", 555);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp.id, &ctx, None).unwrap(), 2);

    let lists = svc.read_lists_added("missing", &sp.id, all(), false).unwrap();
    assert_eq!(lists.items.len(), 1);
    assert_eq!(lists.items[0].read_list_id, ON_DECK_READ_LIST_ID);
    assert_eq!(lists.items[0].updated_at, 555);
}

#[test]
fn on_deck_honors_library_filter() {
    let db = test_db();
    let ctx = setup(&db);
    create_library(&db, "lib-2", true);
    setup_series(&db, "s1", 2);
    create_series(&db, "s2", "lib-2");
    db.save_book(&book("s2-1", "lib-2", Some("s2"), Some(1.0))).unwrap();
    db.save_book(&book("s2-2", "lib-2", Some("s2"), Some(2.0))).unwrap();
    mark_read(&db, "user-1", "s1-1", 200);
    mark_read(&db, "user-1", "s2-1", 200);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    let added = svc
        .add_on_deck(&sp.id, &ctx, Some(&["lib-1".to_string()]))
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(on_deck_books(&svc, &sp.id), ["s1-2"]);
}

// ========== DIFF ENGINE ==========

#[test]
fn diff_books_added_and_removed() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    create_book(&db, "book-b", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    create_book(&db, "book-c", "lib-1");
    db.delete_book("book-a").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert_eq!(book_ids(&svc.books_added(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-c"]);
    assert_eq!(book_ids(&svc.books_removed(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-a"]);
}

#[test]
fn diff_complementarity() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    create_book(&db, "book-b", "lib-1");
    db.delete_book("book-a").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    // booksAdded(A,B) identifies the same ids as booksRemoved(B,A).
    assert_eq!(
        book_ids(&svc.books_added(&sp1.id, &sp2.id, all(), false).unwrap()),
        book_ids(&svc.books_removed(&sp2.id, &sp1.id, all(), false).unwrap()),
    );
    assert_eq!(
        book_ids(&svc.books_added(&sp2.id, &sp1.id, all(), false).unwrap()),
        book_ids(&svc.books_removed(&sp1.id, &sp2.id, all(), false).unwrap()),
    );
}

#[test]
fn diff_books_changed_on_core_fields() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    create_book(&db, "book-b", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let mut changed = book("book-a", "lib-1", None, None);
    changed.file_mtime = 150;
    changed.updated_at = 150;
    db.save_book(&changed).unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert_eq!(book_ids(&svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-a"]);
    assert!(svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
}

#[test]
fn diff_books_changed_on_thumbnail() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    // A cover appearing is a change (null-safe comparison).
    db.save_thumbnail(&Thumbnail {
        id: "thumb-1".to_string(),
        book_id: "book-a".to_string(),
        selected: true,
    })
    .unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert_eq!(book_ids(&svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-a"]);
}

#[test]
fn diff_skips_hash_comparison_when_absent() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    // Hashing turned off: hash disappears but nothing else moved.
    let mut unhashed = book("book-a", "lib-1", None, None);
    unhashed.file_hash = None;
    db.save_book(&unhashed).unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert!(svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
    assert!(svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
}

#[test]
fn diff_read_progress_changed_including_null_transitions() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    create_book(&db, "book-b", "lib-1");
    mark_read(&db, "user-1", "book-b", 200);

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    // Progress added on one book, removed from the other.
    mark_in_progress(&db, "user-1", "book-a", 300);
    db.delete_progress("user-1", "book-b").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert_eq!(
        book_ids(&svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), false).unwrap()),
        ["book-a", "book-b"]
    );
    assert!(svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
}

#[test]
fn diff_changed_and_progress_changed_are_disjoint() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-core", "lib-1");
    create_book(&db, "book-progress", "lib-1");
    create_book(&db, "book-both", "lib-1");
    create_book(&db, "book-removed", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let mut changed = book("book-core", "lib-1", None, None);
    changed.file_size = 2_000;
    db.save_book(&changed).unwrap();

    mark_in_progress(&db, "user-1", "book-progress", 300);

    // Both core fields and progress change in the same interval: reported
    // only under "changed".
    let mut both = book("book-both", "lib-1", None, None);
    both.metadata_updated_at = 400;
    db.save_book(&both).unwrap();
    mark_in_progress(&db, "user-1", "book-both", 400);

    db.delete_book("book-removed").unwrap();
    create_book(&db, "book-added", "lib-1");

    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let added = book_ids(&svc.books_added(&sp1.id, &sp2.id, all(), false).unwrap());
    let removed = book_ids(&svc.books_removed(&sp1.id, &sp2.id, all(), false).unwrap());
    let changed = book_ids(&svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap());
    let progress = book_ids(&svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), false).unwrap());

    assert_eq!(added, ["book-added"]);
    assert_eq!(removed, ["book-removed"]);
    assert_eq!(changed, ["book-both", "book-core"]);
    assert_eq!(progress, ["book-progress"]);

    for id in &changed {
        assert!(!progress.contains(id));
        assert!(!added.contains(id));
        assert!(!removed.contains(id));
    }
}

#[test]
fn diff_against_missing_sync_point_is_empty() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert!(svc.books_in("missing", all(), false).unwrap().is_empty());
    assert!(svc.books_removed("missing", &sp.id, all(), false).unwrap().is_empty());
    assert!(svc.books_changed("missing", &sp.id, all(), false).unwrap().is_empty());
    // Everything in `to` counts as added relative to a missing `from`.
    assert_eq!(book_ids(&svc.books_added("missing", &sp.id, all(), false).unwrap()), ["book-a"]);
}

#[test]
fn diff_pagination_is_deterministic() {
    let db = test_db();
    let ctx = setup(&db);
    for i in 1..=5 {
        create_book(&db, &format!("book-{}", i), "lib-1");
    }

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();

    let page0 = svc.books_in(&sp.id, PageRequest::of(0, 2), false).unwrap();
    let page1 = svc.books_in(&sp.id, PageRequest::of(1, 2), false).unwrap();
    let page2 = svc.books_in(&sp.id, PageRequest::of(2, 2), false).unwrap();

    assert_eq!(page0.total_elements, 5);
    assert_eq!(page0.total_pages(), 3);
    assert_eq!(book_ids(&page0), ["book-1", "book-2"]);
    assert_eq!(book_ids(&page1), ["book-3", "book-4"]);
    assert_eq!(book_ids(&page2), ["book-5"]);
}

#[test]
fn diff_read_lists_changed_on_rename() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    let mut rl = ReadList {
        id: "rl-1".to_string(),
        name: "Before".to_string(),
        created_at: 10,
        updated_at: 10,
    };
    db.save_read_list(&rl).unwrap();
    db.add_read_list_book("rl-1", "book-a").unwrap();

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();

    rl.name = "After".to_string();
    db.save_read_list(&rl).unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let changed = svc.read_lists_changed(&sp1.id, &sp2.id, all(), false).unwrap();
    assert_eq!(changed.items.len(), 1);
    assert_eq!(changed.items[0].name, "After");
    assert!(svc.read_lists_added(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
}

#[test]
fn diff_read_lists_removed_with_ack() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    db.save_read_list(&ReadList {
        id: "rl-1".to_string(),
        name: "Favorites".to_string(),
        created_at: 10,
        updated_at: 10,
    })
    .unwrap();
    db.add_read_list_book("rl-1", "book-a").unwrap();

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    db.delete_read_list("rl-1").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let removed = svc.read_lists_removed(&sp1.id, &sp2.id, all(), true).unwrap();
    assert_eq!(removed.items.len(), 1);

    svc.mark_read_lists_synced(&sp2.id, true, &["rl-1".to_string()]).unwrap();
    assert!(svc.read_lists_removed(&sp1.id, &sp2.id, all(), true).unwrap().is_empty());
    // Without the flag the removal still shows.
    assert_eq!(svc.read_lists_removed(&sp1.id, &sp2.id, all(), false).unwrap().items.len(), 1);
}

// ========== ACKNOWLEDGMENT TRACKER ==========

#[test]
fn mark_books_synced_is_idempotent() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    create_book(&db, "book-b", "lib-1");

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();

    let ids = vec!["book-a".to_string()];
    svc.mark_books_synced(&sp.id, false, &ids).unwrap();
    svc.mark_books_synced(&sp.id, false, &ids).unwrap();

    let unsynced = svc.books_in(&sp.id, all(), true).unwrap();
    assert_eq!(book_ids(&unsynced), ["book-b"]);

    let book_a = &svc.books_in(&sp.id, all(), false).unwrap().items[0];
    assert!(book_a.synced);
}

#[test]
fn mark_removed_books_synced_is_idempotent() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    db.delete_book("book-a").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let ids = vec!["book-a".to_string()];
    svc.mark_books_synced(&sp2.id, true, &ids).unwrap();
    svc.mark_books_synced(&sp2.id, true, &ids).unwrap();

    assert!(svc.books_removed(&sp1.id, &sp2.id, all(), true).unwrap().is_empty());
    assert_eq!(book_ids(&svc.books_removed(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-a"]);
}

#[test]
fn mark_synced_with_empty_ids_is_noop() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();

    svc.mark_books_synced(&sp.id, false, &[]).unwrap();
    svc.mark_books_synced(&sp.id, true, &[]).unwrap();
    svc.mark_read_lists_synced(&sp.id, false, &[]).unwrap();

    assert_eq!(svc.books_in(&sp.id, all(), true).unwrap().total_elements, 1);
}

#[test]
fn fingerprints_are_immutable_under_diff_and_ack() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    mark_read(&db, "user-1", "book-a", 200);

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    let before = svc.books_in(&sp2.id, all(), false).unwrap().items;

    svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap();
    svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), true).unwrap();
    svc.mark_books_synced(&sp2.id, false, &["book-a".to_string()]).unwrap();

    let after = svc.books_in(&sp2.id, all(), false).unwrap().items;
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        // Only the synced flag may move.
        let mut acked = b.clone();
        acked.synced = true;
        assert_eq!(&acked, a);
    }
}

// ========== LIFECYCLE MANAGER ==========

#[test]
fn delete_one_removes_sync_point_and_children() {
    let db = test_db();
    let ctx = setup(&db);
    setup_series(&db, "s1", 2);
    mark_read(&db, "user-1", "s1-1", 200);

    let svc = service(&db);
    let sp = svc.create(&BookSearch::default(), &ctx).unwrap();
    svc.add_on_deck(&sp.id, &ctx, None).unwrap();
    svc.mark_books_synced(&sp.id, true, &["ghost".to_string()]).unwrap();

    svc.delete_one(&sp.id).unwrap();

    assert!(svc.find_by_id(&sp.id).unwrap().is_none());
    assert!(svc.books_in(&sp.id, all(), false).unwrap().is_empty());
    assert!(on_deck_books(&svc, &sp.id).is_empty());

    // Deleting an absent sync point is not an error.
    svc.delete_one(&sp.id).unwrap();
}

#[test]
fn delete_by_user_and_api_keys_scoping() {
    let db = test_db();
    let ctx = setup(&db);
    create_user(&db, "user-2");
    create_book(&db, "book-a", "lib-1");

    let svc = service(&db);
    let sp_session = svc.create(&BookSearch::default(), &ctx).unwrap();
    let sp_key = svc
        .create(&BookSearch::default(), &ctx.clone().with_api_key("key-1"))
        .unwrap();
    let other = svc
        .create(&BookSearch::default(), &AccessContext::for_user("user-2"))
        .unwrap();

    // Key revocation removes only the scoped sync point.
    let deleted = svc
        .delete_by_user_and_api_keys("user-1", &["key-1".to_string()])
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(svc.find_by_id(&sp_key.id).unwrap().is_none());
    assert!(svc.find_by_id(&sp_session.id).unwrap().is_some());

    assert_eq!(svc.delete_by_user_and_api_keys("user-1", &[]).unwrap(), 0);

    // Account cleanup removes the rest, but not other users' points.
    assert_eq!(svc.delete_by_user("user-1").unwrap(), 1);
    assert!(svc.find_by_id(&other.id).unwrap().is_some());

    assert_eq!(svc.delete_all().unwrap(), 1);
    assert!(svc.find_by_id(&other.id).unwrap().is_none());
}

#[test]
fn retention_cleanup_deletes_old_sync_points() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");

    let day = 24 * 60 * 60;
    let old_svc = service_at(&db, 1_000);
    let sp_old = old_svc.create(&BookSearch::default(), &ctx).unwrap();

    let now_svc = service_at(&db, 1_000 + 40 * day);
    let sp_new = now_svc.create(&BookSearch::default(), &ctx).unwrap();

    let config = SyncConfig {
        retention_days: 30,
        hash_books: true,
    };
    assert_eq!(now_svc.cleanup(&config).unwrap(), 1);
    assert!(now_svc.find_by_id(&sp_old.id).unwrap().is_none());
    assert!(now_svc.find_by_id(&sp_new.id).unwrap().is_some());

    // Retention disabled: nothing happens.
    let config = SyncConfig {
        retention_days: 0,
        hash_books: true,
    };
    assert_eq!(now_svc.cleanup(&config).unwrap(), 0);
}

// ========== SPEC SCENARIOS ==========

#[test]
fn scenario_added_and_progress_changed() {
    let db = test_db();
    let ctx = setup(&db);
    create_series(&db, "s1", "lib-1");
    db.save_book(&book("book-a", "lib-1", Some("s1"), Some(1.0))).unwrap();
    db.save_book(&book("book-b", "lib-1", Some("s1"), Some(2.0))).unwrap();
    db.save_book(&book("book-c", "lib-1", Some("s1"), Some(3.0))).unwrap();
    mark_read(&db, "user-1", "book-a", 200);
    mark_read(&db, "user-1", "book-b", 210);

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp1.id, &ctx, None).unwrap(), 1);
    assert_eq!(on_deck_books(&svc, &sp1.id), ["book-c"]);

    db.save_book(&book("book-d", "lib-1", Some("s1"), Some(4.0))).unwrap();
    mark_in_progress(&db, "user-1", "book-a", 300);

    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();
    assert_eq!(svc.add_on_deck(&sp2.id, &ctx, None).unwrap(), 0);

    assert_eq!(book_ids(&svc.books_added(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-d"]);
    assert!(svc.books_changed(&sp1.id, &sp2.id, all(), false).unwrap().is_empty());
    assert_eq!(
        book_ids(&svc.books_read_progress_changed(&sp1.id, &sp2.id, all(), false).unwrap()),
        ["book-a"]
    );
    assert!(on_deck_books(&svc, &sp2.id).is_empty());

    // The on-deck list itself shows up as a removed read list.
    let removed = svc.read_lists_removed(&sp1.id, &sp2.id, all(), false).unwrap();
    assert_eq!(removed.items.len(), 1);
    assert_eq!(removed.items[0].read_list_id, ON_DECK_READ_LIST_ID);
}

#[test]
fn scenario_removal_with_acknowledgment() {
    let db = test_db();
    let ctx = setup(&db);
    create_book(&db, "book-a", "lib-1");
    create_book(&db, "book-b", "lib-1");

    let svc = service(&db);
    let sp1 = svc.create(&BookSearch::default(), &ctx).unwrap();
    db.delete_book("book-b").unwrap();
    let sp2 = svc.create(&BookSearch::default(), &ctx).unwrap();

    assert_eq!(book_ids(&svc.books_removed(&sp1.id, &sp2.id, all(), false).unwrap()), ["book-b"]);

    svc.mark_books_synced(&sp2.id, true, &["book-b".to_string()]).unwrap();
    assert!(svc.books_removed(&sp1.id, &sp2.id, all(), true).unwrap().is_empty());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[database]
path = "/tmp/test.db"

[sync]
retention_days = 14
hash_books = false
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.database.path.to_str(), Some("/tmp/test.db"));
    assert_eq!(config.sync.retention_days, 14);
    assert!(!config.sync.hash_books);
    assert!(config.sync.retention_enabled());
    assert_eq!(config.sync.retention_seconds(), Some(14 * 24 * 60 * 60));
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.database.path.to_str(), Some("data/library.db"));
    assert_eq!(config.sync.retention_days, 0);
    assert!(config.sync.hash_books);
    assert!(!config.sync.retention_enabled());
    assert_eq!(config.sync.retention_seconds(), None);
}

#[test]
fn config_load_round_trips_generated_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shelfsync.toml");
    std::fs::write(&path, Config::generate_default()).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.sync.retention_days, 0);
    assert!(config.sync.hash_books);
    // Database path is commented out in the generated file.
    assert_eq!(config.database.path.to_str(), Some("data/library.db"));

    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        Config::load(&missing),
        Err(crate::AppError::Config(_))
    ));
}

#[test]
fn database_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("library.db");

    let db = Database::open(&path).unwrap();
    create_user(&db, "user-1");
    assert!(db.get_user_by_id("user-1").unwrap().is_some());
    assert!(path.exists());
}
