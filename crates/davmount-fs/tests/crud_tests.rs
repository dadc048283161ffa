//! Create, read, write, rename and delete through the adapter.
//!
//! Run: `cargo test -p davmount-fs --test crud_tests`

mod common;

use std::sync::Arc;

use common::TestMount;
use davmount_cache::{RepoOp, attributes};
use davmount_fs::{FsError, cleanup};

fn cached_paths(mount: &TestMount, prefix: &str) -> Vec<String> {
    let mut paths: Vec<String> = mount
        .fs
        .manager()
        .cache()
        .snapshot()
        .into_iter()
        .filter(|p| p == prefix || p.starts_with(&format!("{prefix}/")))
        .collect();
    paths.sort();
    paths
}

// ============================================================================
// Create
// ============================================================================

#[test]
fn test_create_file_uploads_empty_document() {
    let mount = TestMount::write_back();

    let handle = mount.fs.create("/new.txt", attributes::ARCHIVE, 0).unwrap();
    assert!(!handle.is_directory());
    assert_eq!(handle.info().file_size, 0);
    assert_eq!(handle.node().open_count(), 1);
    assert_eq!(mount.remote_contents("/new.txt").unwrap(), b"");
    mount.fs.close(handle);

    let again = mount.fs.open("/new.txt").unwrap();
    assert_eq!(again.normalized_name(), "/new.txt");
    mount.fs.close(again);
}

#[test]
fn test_create_folder() {
    let mount = TestMount::write_back();

    let handle = mount.fs.create("/Reports", attributes::DIRECTORY, 0).unwrap();
    assert!(handle.is_directory());
    assert!(mount.remote_exists("/Reports"));
    assert_eq!(mount.repo.calls(RepoOp::CreateDir), 1);
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);
    mount.fs.close(handle);
}

#[test]
fn test_create_existing_is_collision() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abc");

    let result = mount.fs.create("/a.txt", attributes::ARCHIVE, 0);
    assert!(matches!(result, Err(FsError::NameCollision(_))));
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abc");
}

#[test]
fn test_create_root_is_collision() {
    let mount = TestMount::write_back();
    assert!(matches!(
        mount.fs.create("/", attributes::DIRECTORY, 0),
        Err(FsError::NameCollision(_))
    ));
}

#[test]
fn test_create_after_known_missing() {
    let mount = TestMount::write_back();
    assert!(matches!(mount.fs.open("/later.txt"), Err(FsError::NotFound(_))));

    let handle = mount.fs.create("/later.txt", attributes::ARCHIVE, 0).unwrap();
    mount.fs.close(handle);
    assert!(mount.fs.open("/later.txt").is_ok());
}

#[test]
fn test_create_oversized_allocation_is_disk_full() {
    let mount = TestMount::write_back();
    let result = mount.fs.create("/big.bin", attributes::ARCHIVE, u64::MAX);
    assert!(matches!(result, Err(FsError::DiskFull { .. })));
    assert!(!mount.remote_exists("/big.bin"));
}

#[test]
fn test_create_with_allocation_reserves_without_growing() {
    let mount = TestMount::write_back();
    let handle = mount.fs.create("/alloc.bin", attributes::ARCHIVE, 10_000).unwrap();
    let info = handle.info();
    assert_eq!(info.file_size, 0);
    assert_eq!(info.allocation_size, 10_000);
    mount.fs.close(handle);
}

// ============================================================================
// Read
// ============================================================================

#[test]
fn test_read_downloads_once() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"hello world");

    let handle = mount.fs.open("/a.txt").unwrap();
    assert_eq!(mount.fs.read(&handle, 0, 5).unwrap(), b"hello");
    assert_eq!(mount.fs.read(&handle, 6, 100).unwrap(), b"world");
    assert_eq!(mount.repo.calls(RepoOp::Download), 1);
    mount.fs.close(handle);
}

#[test]
fn test_read_past_end_is_end_of_file() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abc");

    let handle = mount.fs.open("/a.txt").unwrap();
    assert_eq!(mount.fs.read(&handle, 3, 10), Err(FsError::EndOfFile));
    assert_eq!(mount.fs.read(&handle, 1, 10).unwrap(), b"bc");
    mount.fs.close(handle);
}

#[test]
fn test_read_directory_node_fails() {
    let mount = TestMount::write_back();
    mount.add_folder("/docs");

    let handle = mount.fs.open("/docs").unwrap();
    assert!(matches!(mount.fs.read(&handle, 0, 1), Err(FsError::IoError(_))));
    mount.fs.close(handle);
}

// ============================================================================
// Write
// ============================================================================

#[test]
fn test_overlapping_writes_later_wins() {
    let mount = TestMount::write_back();
    let handle = mount.fs.create("/data.bin", attributes::ARCHIVE, 0).unwrap();

    let first: Vec<u8> = (0..100).collect();
    let second: Vec<u8> = (200..=255).chain(0..44).collect();
    assert_eq!(second.len(), 100);

    mount.fs.write(&handle, 0, &first, false, false).unwrap();
    let reply = mount.fs.write(&handle, 50, &second, false, false).unwrap();
    assert_eq!(reply.bytes_transferred, 100);
    assert_eq!(reply.info.file_size, 150);

    let data = mount.fs.read(&handle, 0, 150).unwrap();
    assert_eq!(data.len(), 150);
    assert_eq!(&data[..50], &first[..50]);
    assert_eq!(&data[50..], &second[..]);
    mount.fs.close(handle);

    assert_eq!(mount.remote_contents("/data.bin").unwrap().len(), 150);
}

#[test]
fn test_constrained_write_at_end_transfers_nothing() {
    let mount = TestMount::write_through();
    mount.add_file("/a.txt", b"abc");
    let handle = mount.fs.open("/a.txt").unwrap();
    mount.repo.reset_calls();

    let reply = mount.fs.write(&handle, 3, b"xyz", false, true).unwrap();
    assert_eq!(reply.bytes_transferred, 0);
    assert_eq!(reply.info.file_size, 3);
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);

    let reply = mount.fs.write(&handle, 1, b"xyz", false, true).unwrap();
    assert_eq!(reply.bytes_transferred, 2);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"axy");
    mount.fs.close(handle);
}

#[test]
fn test_write_to_end_appends() {
    let mount = TestMount::write_back();
    mount.add_file("/log.txt", b"one\n");
    let handle = mount.fs.open("/log.txt").unwrap();

    let reply = mount.fs.write(&handle, 0, b"two\n", true, false).unwrap();
    assert_eq!(reply.info.file_size, 8);
    mount.fs.close(handle);
    assert_eq!(mount.remote_contents("/log.txt").unwrap(), b"one\ntwo\n");
}

#[test]
fn test_write_through_uploads_every_write() {
    let mount = TestMount::write_through();
    mount.add_file("/a.txt", b"abc");
    let handle = mount.fs.open("/a.txt").unwrap();
    mount.repo.reset_calls();

    mount.fs.write(&handle, 3, b"def", false, false).unwrap();
    assert_eq!(mount.repo.calls(RepoOp::Upload), 1);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abcdef");
    assert!(!handle.node().has_unflushed_data());

    mount.fs.write(&handle, 0, b"A", false, false).unwrap();
    assert_eq!(mount.repo.calls(RepoOp::Upload), 2);

    mount.fs.close(handle);
    assert_eq!(mount.repo.calls(RepoOp::Upload), 2);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"Abcdef");
}

#[test]
fn test_write_back_defers_upload_until_close() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abc");
    let handle = mount.fs.open("/a.txt").unwrap();
    mount.repo.reset_calls();

    mount.fs.write(&handle, 3, b"def", false, false).unwrap();
    mount.fs.write(&handle, 6, b"ghi", false, false).unwrap();
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);
    assert!(handle.node().has_unflushed_data());
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abc");

    let node = Arc::clone(handle.node());
    mount.fs.close(handle);
    assert_eq!(mount.repo.calls(RepoOp::Upload), 1);
    assert!(!node.has_unflushed_data());
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abcdefghi");
}

#[test]
fn test_write_back_flush_uploads_pending() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abc");
    let handle = mount.fs.open("/a.txt").unwrap();

    mount.fs.write(&handle, 0, b"X", false, false).unwrap();
    let info = mount.fs.flush(&handle).unwrap();
    assert_eq!(info.file_size, 3);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"Xbc");

    mount.repo.reset_calls();
    mount.fs.flush(&handle).unwrap();
    mount.fs.close(handle);
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);
}

#[test]
fn test_cleanup_flags_trigger_write_back_upload() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abc");
    let handle = mount.fs.open("/a.txt").unwrap();
    mount.fs.write(&handle, 0, b"Z", false, false).unwrap();

    mount.fs.cleanup(&handle, cleanup::SET_LAST_ACCESS_TIME);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abc");

    mount.fs.cleanup(&handle, cleanup::SET_ARCHIVE_BIT | cleanup::SET_LAST_WRITE_TIME);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"Zbc");
    assert_ne!(handle.info().file_attributes & attributes::ARCHIVE, 0);
    mount.fs.close(handle);
}

#[test]
fn test_handles_share_one_buffer() {
    let mount = TestMount::write_back();
    mount.add_file("/shared.txt", b"....");
    let writer = mount.fs.open("/shared.txt").unwrap();
    let reader = mount.fs.open("/shared.txt").unwrap();

    mount.fs.write(&writer, 0, b"ab", false, false).unwrap();
    assert_eq!(mount.fs.read(&reader, 0, 4).unwrap(), b"ab..");
    assert_eq!(mount.repo.calls(RepoOp::Download), 1);

    mount.fs.close(writer);
    mount.fs.close(reader);
}

// ============================================================================
// Size
// ============================================================================

#[test]
fn test_set_size_truncates_and_extends() {
    let mount = TestMount::write_through();
    mount.add_file("/a.txt", b"abcdef");
    let handle = mount.fs.open("/a.txt").unwrap();

    let info = mount.fs.set_size(&handle, 2, false).unwrap();
    assert_eq!(info.file_size, 2);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"ab");

    let info = mount.fs.set_size(&handle, 4, false).unwrap();
    assert_eq!(info.file_size, 4);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"ab\0\0");
    mount.fs.close(handle);
}

#[test]
fn test_set_allocation_size_below_length_truncates() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"abcdef");
    let handle = mount.fs.open("/a.txt").unwrap();

    let info = mount.fs.set_size(&handle, 3, true).unwrap();
    assert_eq!(info.allocation_size, 3);
    assert_eq!(info.file_size, 3);
    mount.fs.close(handle);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"abc");
}

#[test]
fn test_overwrite_truncates_remote_on_close() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"previous");
    let handle = mount.fs.open("/a.txt").unwrap();

    let info = mount.fs.overwrite(&handle, attributes::NORMAL, true, 0).unwrap();
    assert_eq!(info.file_size, 0);
    assert_eq!(info.file_attributes, attributes::NORMAL | attributes::ARCHIVE);
    assert_eq!(mount.repo.calls(RepoOp::Download), 0);

    mount.fs.write(&handle, 0, b"next", false, false).unwrap();
    mount.fs.close(handle);
    assert_eq!(mount.remote_contents("/a.txt").unwrap(), b"next");
}

// ============================================================================
// Rename
// ============================================================================

#[test]
fn test_rename_file() {
    let mount = TestMount::write_back();
    mount.add_file("/old.txt", b"data");
    let handle = mount.fs.open("/old.txt").unwrap();

    mount.fs.rename(&handle, "/old.txt", "/new.txt", false).unwrap();
    assert_eq!(handle.node().local_path(), "/new.txt");
    assert!(!mount.remote_exists("/old.txt"));
    assert_eq!(mount.remote_contents("/new.txt").unwrap(), b"data");
    mount.fs.close(handle);

    assert!(matches!(mount.fs.open("/old.txt"), Err(FsError::NotFound(_))));
    assert!(mount.fs.open("/new.txt").is_ok());
}

#[test]
fn test_rename_folder_cascades_cached_descendants() {
    let mount = TestMount::write_back();
    mount.add_file("/A/x.txt", b"x");
    mount.add_file("/A/y/z.txt", b"z");

    let folder = mount.fs.open("/A").unwrap();
    let x = mount.fs.resolve("/A/x.txt").unwrap();
    mount.fs.resolve("/A/y").unwrap();
    let z = mount.fs.resolve("/A/y/z.txt").unwrap();

    mount.fs.rename(&folder, "/A", "/B", false).unwrap();

    assert!(cached_paths(&mount, "/A").is_empty());
    assert_eq!(
        cached_paths(&mount, "/B"),
        vec!["/B", "/B/x.txt", "/B/y", "/B/y/z.txt"]
    );
    assert_eq!(z.local_path(), "/B/y/z.txt");
    assert_eq!(z.repository_path(), mount.remote("/B/y/z.txt"));
    assert!(Arc::ptr_eq(&x, &mount.fs.resolve("/B/x.txt").unwrap()));
    assert!(mount.remote_exists("/B/y/z.txt"));
    mount.fs.close(folder);
}

#[test]
fn test_rename_onto_existing_requires_replace() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"a");
    mount.add_file("/b.txt", b"b");
    let handle = mount.fs.open("/a.txt").unwrap();

    let result = mount.fs.rename(&handle, "/a.txt", "/b.txt", false);
    assert!(matches!(result, Err(FsError::NameCollision(_))));
    assert_eq!(mount.repo.calls(RepoOp::MoveFile), 0);

    mount.fs.rename(&handle, "/a.txt", "/b.txt", true).unwrap();
    assert_eq!(mount.remote_contents("/b.txt").unwrap(), b"a");
    assert!(!mount.remote_exists("/a.txt"));
    mount.fs.close(handle);
}

#[test]
fn test_rename_to_same_path_is_noop() {
    let mount = TestMount::write_back();
    mount.add_file("/a.txt", b"a");
    let handle = mount.fs.open("/a.txt").unwrap();
    mount.fs.rename(&handle, "/a.txt", "/a.txt", false).unwrap();
    assert_eq!(mount.repo.calls(RepoOp::MoveFile), 0);
    mount.fs.close(handle);
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_folder_cascades() {
    let mount = TestMount::write_back();
    mount.add_file("/A/x.txt", b"x");
    mount.add_file("/A/y.txt", b"y");
    mount.add_file("/keep.txt", b"k");

    let folder = mount.fs.open("/A").unwrap();
    mount.fs.resolve("/A/x.txt").unwrap();
    mount.fs.resolve("/A/y.txt").unwrap();
    mount.fs.resolve("/keep.txt").unwrap();
    assert_eq!(cached_paths(&mount, "/A").len(), 3);

    assert!(mount.fs.can_delete(&folder).is_ok());
    mount.fs.cleanup(&folder, cleanup::DELETE);
    mount.fs.close(folder);

    assert!(cached_paths(&mount, "/A").is_empty());
    assert_eq!(cached_paths(&mount, "/keep.txt"), vec!["/keep.txt"]);
    assert!(!mount.remote_exists("/A"));
    assert!(matches!(mount.fs.open("/A"), Err(FsError::NotFound(_))));
}

#[test]
fn test_delete_file_removes_only_itself() {
    let mount = TestMount::write_back();
    mount.add_file("/A/x.txt", b"x");
    mount.add_file("/A/y.txt", b"y");

    let x = mount.fs.open("/A/x.txt").unwrap();
    mount.fs.resolve("/A/y.txt").unwrap();
    mount.fs.cleanup(&x, cleanup::DELETE);
    mount.fs.close(x);

    assert_eq!(cached_paths(&mount, "/A/x.txt"), Vec::<String>::new());
    assert_eq!(cached_paths(&mount, "/A/y.txt"), vec!["/A/y.txt"]);
    assert!(!mount.remote_exists("/A/x.txt"));
    assert!(mount.remote_exists("/A/y.txt"));
}

#[test]
fn test_deleted_file_is_not_uploaded_on_close() {
    let mount = TestMount::write_back();
    mount.add_file("/tmp.txt", b"");

    let handle = mount.fs.open("/tmp.txt").unwrap();
    mount.fs.write(&handle, 0, b"scratch", false, false).unwrap();
    mount.fs.cleanup(&handle, cleanup::DELETE | cleanup::SET_LAST_WRITE_TIME);
    assert!(!mount.remote_exists("/tmp.txt"));
    mount.fs.flush(&handle).unwrap();
    mount.fs.close(handle);

    assert!(!mount.remote_exists("/tmp.txt"));
    assert_eq!(mount.repo.calls(RepoOp::Upload), 0);
    assert!(matches!(mount.fs.open("/tmp.txt"), Err(FsError::NotFound(_))));
}

#[test]
fn test_cleanup_never_deletes_root() {
    let mount = TestMount::write_back();
    let root = mount.fs.open("/").unwrap();
    mount.fs.cleanup(&root, cleanup::DELETE);
    mount.fs.close(root);
    assert_eq!(mount.repo.calls(RepoOp::DeleteFolder), 0);
    assert!(mount.fs.open("/").is_ok());
}
