//! Exercises the read scheduler against a `mockall`-generated `TorrentHandle`
//! rather than the in-memory session backend, so cancellation and
//! already-complete paths can be asserted without any piece-completion
//! plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mockall::mock;
use torrentfs::error::{Result, TorrentFsError};
use torrentfs::path_index::FileEntry;
use torrentfs::read_scheduler::{scheduled_read, PieceWaker, PriorityLedger, ReadMode};
use torrentfs::session::{TorrentHandle, TorrentState, TorrentStats};

// `as_any`'s `&dyn std::any::Any` return type is never Send + Sync, so
// letting `mockall` generate expectation storage for it (via `impl
// TorrentHandle for Handle { ... }`) would make `MockHandle` itself
// `!Send + !Sync`, which conflicts with `TorrentHandle: Send + Sync` once
// it's boxed as `Arc<dyn TorrentHandle>` below. None of these tests
// exercise `as_any`, so it's mocked as inherent methods only and the trait
// is implemented by hand, delegating to those inherent methods.
mock! {
    Handle {
        fn piece_length(&self) -> u64;
        fn num_pieces(&self) -> u32;
        fn has_piece(&self, index: u32) -> bool;
        fn set_piece_priority(&self, index: u32, priority: u8);
        fn set_piece_deadline(&self, index: u32, deadline_ms_from_now: u64);
        fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
        fn state(&self) -> TorrentState;
        fn stats(&self) -> TorrentStats;
        fn save_resume_data(&self) -> Vec<u8>;
        fn reannounce(&self);
    }
}

impl TorrentHandle for MockHandle {
    fn piece_length(&self) -> u64 {
        self.piece_length()
    }
    fn num_pieces(&self) -> u32 {
        self.num_pieces()
    }
    fn has_piece(&self, index: u32) -> bool {
        self.has_piece(index)
    }
    fn set_piece_priority(&self, index: u32, priority: u8) {
        self.set_piece_priority(index, priority)
    }
    fn set_piece_deadline(&self, index: u32, deadline_ms_from_now: u64) {
        self.set_piece_deadline(index, deadline_ms_from_now)
    }
    fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.read_bytes(offset, len)
    }
    fn state(&self) -> TorrentState {
        self.state()
    }
    fn stats(&self) -> TorrentStats {
        self.stats()
    }
    fn save_resume_data(&self) -> Vec<u8> {
        self.save_resume_data()
    }
    fn reannounce(&self) {
        self.reannounce()
    }
    fn as_any(&self) -> &dyn std::any::Any {
        unimplemented!("as_any is not exercised by these tests")
    }
}

fn sample_file() -> FileEntry {
    FileEntry {
        path: "f.bin".into(),
        size: 16,
        offset: 0,
        first_piece: 0,
        last_piece: 3,
        offset_in_first_piece: 0,
        offset_in_last_piece: 3,
    }
}

#[tokio::test]
async fn sync_read_completes_immediately_when_every_piece_is_already_present() {
    let mut mock = MockHandle::new();
    mock.expect_piece_length().return_const(4u64);
    mock.expect_has_piece().returning(|_| true);
    mock.expect_set_piece_priority().returning(|_, _| ());
    mock.expect_set_piece_deadline().returning(|_, _| ());
    mock.expect_read_bytes().returning(|offset, len| Ok(vec![0xAB; len as usize].into_iter().map(|b| b + offset as u8).collect()));

    let handle: Arc<dyn TorrentHandle> = Arc::new(mock);
    let waker = PieceWaker::new();
    let ledger = PriorityLedger::new();
    let cancel = tokio::sync::Notify::new();
    let file = sample_file();

    let out = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Sync, Some(1.0), &cancel)
        .await
        .unwrap();
    assert_eq!(out.len(), 16);
}

#[tokio::test]
async fn cancelling_an_in_flight_read_returns_cancelled_and_releases_the_ledger() {
    let mut mock = MockHandle::new();
    mock.expect_piece_length().return_const(4u64);
    mock.expect_has_piece().returning(|_| false);
    let released = Arc::new(AtomicBool::new(false));
    let released_clone = released.clone();
    mock.expect_set_piece_priority().returning(move |_, priority| {
        if priority == torrentfs::read_scheduler::PRIORITY_IDLE {
            released_clone.store(true, Ordering::SeqCst);
        }
    });
    mock.expect_set_piece_deadline().returning(|_, _| ());

    let handle: Arc<dyn TorrentHandle> = Arc::new(mock);
    let waker = PieceWaker::new();
    let ledger = PriorityLedger::new();
    let cancel = Arc::new(tokio::sync::Notify::new());
    let file = sample_file();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cancel_clone.notify_waiters();
    });

    let err = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Auto, Some(5.0), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TorrentFsError::Cancelled));
    assert!(released.load(Ordering::SeqCst));
}
