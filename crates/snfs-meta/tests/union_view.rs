//! Integration tests for layered filesystem views.

use std::io::{Cursor, Read};
use std::sync::Arc;

use snfs_meta::{FsLimits, MetaError, NamespaceEngine, NodeKind, UnionView, WriteOptions};
use snfs_storage::{new_cancel_pair, BlobStore, MemoryBlobStore};

fn filesystem(blobs: &Arc<dyn BlobStore>, limits: FsLimits) -> Arc<NamespaceEngine> {
    Arc::new(NamespaceEngine::new(blobs.clone(), limits, 32).unwrap())
}

#[test]
fn test_writable_base_over_overlay() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(&blobs, FsLimits::unbounded());
    let o = filesystem(&blobs, FsLimits::unbounded());
    w.writefile("/x", b"from w", WriteOptions::default()).unwrap();
    o.writefile("/x", b"from o", WriteOptions::default()).unwrap();
    o.writefile("/y", b"only in o", WriteOptions::default())
        .unwrap();

    let view = UnionView::new(w.clone(), true, vec![o.clone()]);
    let listing = view.readdir("/").unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].name, "x");
    assert!(listing[0].writeable);
    assert_eq!(listing[1].name, "y");
    assert!(!listing[1].writeable);

    // Overlay-only files cannot be removed through the view.
    assert!(matches!(view.unlink("/y"), Err(MetaError::ReadOnly { .. })));
    assert_eq!(view.readfile("/y").unwrap(), b"only in o");
    assert_eq!(o.usage().no_files, 2);
}

#[test]
fn test_overlays_share_the_blob_store() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(&blobs, FsLimits::unbounded());
    let o = filesystem(&blobs, FsLimits::unbounded());
    o.writefile("/same", b"identical bytes", WriteOptions::default())
        .unwrap();
    let view = UnionView::new(w.clone(), true, vec![o]);
    view.writefile("/copy", b"identical bytes", WriteOptions::default())
        .unwrap();
    assert_eq!(blobs.chunk_count(), 1);
    assert_eq!(w.usage().bytes_used, 15);
}

#[test]
fn test_quota_applies_to_base_only() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(
        &blobs,
        FsLimits {
            max_files: 1,
            ..FsLimits::unbounded()
        },
    );
    let o = filesystem(&blobs, FsLimits::unbounded());
    for name in ["/a", "/b", "/c"] {
        o.writefile(name, b"o", WriteOptions::default()).unwrap();
    }
    let view = UnionView::new(w.clone(), true, vec![o]);
    view.writefile("/mine", b"1", WriteOptions::default())
        .unwrap();
    assert!(matches!(
        view.writefile("/mine2", b"2", WriteOptions::default()),
        Err(MetaError::QuotaExceeded { .. })
    ));
    assert_eq!(view.readdir("/").unwrap().len(), 4);
}

#[test]
fn test_copy_up_respects_base_depth_limit() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(
        &blobs,
        FsLimits {
            max_depth: 1,
            ..FsLimits::unbounded()
        },
    );
    let o = filesystem(&blobs, FsLimits::unbounded());
    o.mkdir("/deep").unwrap();
    let view = UnionView::new(w.clone(), true, vec![o]);
    assert!(matches!(
        view.writefile("/deep/f", b"x", WriteOptions::default()),
        Err(MetaError::QuotaExceeded { .. })
    ));
    assert_eq!(w.usage().no_files, 0);
    assert!(w.stat("/deep").is_err());
}

#[test]
fn test_streamed_read_through_view() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(&blobs, FsLimits::unbounded());
    let o = filesystem(&blobs, FsLimits::unbounded());
    o.mkdir("/media").unwrap();
    let payload: Vec<u8> = (0..500u32).map(|i| (i * 7) as u8).collect();
    o.writefile("/media/clip", &payload, WriteOptions::default())
        .unwrap();
    let view = UnionView::new(w, false, vec![o]);
    assert_eq!(view.stat("/media").unwrap().kind, NodeKind::Directory);
    let mut out = Vec::new();
    view.open_read("/media/clip")
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, payload);
}

#[test]
fn test_failed_write_leaves_no_copied_up_directories() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(
        &blobs,
        FsLimits {
            max_storage: 2,
            ..FsLimits::unbounded()
        },
    );
    let o = filesystem(&blobs, FsLimits::unbounded());
    o.mkdir("/docs").unwrap();
    o.mkdir("/docs/2024").unwrap();
    let view = UnionView::new(w.clone(), true, vec![o]);

    assert!(!view.stat("/docs").unwrap().writeable);
    assert!(matches!(
        view.writefile("/docs/2024/big", b"too many bytes", WriteOptions::default()),
        Err(MetaError::QuotaExceeded { .. })
    ));
    assert!(!view.stat("/docs").unwrap().writeable);
    assert!(!view.stat("/docs/2024").unwrap().writeable);
    assert!(w.stat("/docs").is_err());

    let (token, _handle) = new_cancel_pair();
    assert!(matches!(
        view.writefile_stream(
            "/docs/2024/big",
            &mut Cursor::new(vec![7u8; 100]),
            WriteOptions::default(),
            &token,
        ),
        Err(MetaError::QuotaExceeded { .. })
    ));
    assert!(w.stat("/docs").is_err());
    assert_eq!(w.usage().no_files, 0);
    assert_eq!(w.usage().bytes_used, 0);

    // A write that fits still copies the directories up.
    view.writefile("/docs/2024/ok", b"ok", WriteOptions::default())
        .unwrap();
    assert!(view.stat("/docs/2024").unwrap().writeable);
}

#[test]
fn test_failed_move_leaves_no_copied_up_directories() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let w = filesystem(
        &blobs,
        FsLimits {
            max_depth: 3,
            ..FsLimits::unbounded()
        },
    );
    let o = filesystem(&blobs, FsLimits::unbounded());
    o.mkdir("/docs").unwrap();
    w.mkdir("/tree").unwrap();
    w.mkdir("/tree/a").unwrap();
    w.writefile("/tree/a/b", b"leaf", WriteOptions::default())
        .unwrap();
    let view = UnionView::new(w.clone(), true, vec![o]);

    // /docs/tree/a/b would sit at depth 4.
    assert!(matches!(
        view.rename("/tree", "/docs/tree"),
        Err(MetaError::QuotaExceeded { .. })
    ));
    assert!(w.stat("/docs").is_err());
    assert!(!view.stat("/docs").unwrap().writeable);
    assert_eq!(view.readfile("/tree/a/b").unwrap(), b"leaf");

    view.rename("/tree/a/b", "/docs/b").unwrap();
    assert_eq!(w.readfile("/docs/b").unwrap(), b"leaf");
}
