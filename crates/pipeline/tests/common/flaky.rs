use async_trait::async_trait;
use bytes::Bytes;
use sieve_storage::{ByteStream, ObjectMeta, ObjectStore, StorageError, StorageResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Store wrapper whose reads and writes can be made to fail or stall on demand.
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    fail_reads: AtomicBool,
    fail_puts: AtomicBool,
    stall_puts: AtomicBool,
    stalled: AtomicUsize,
    release: Semaphore,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_puts: AtomicBool::new(false),
            stall_puts: AtomicBool::new(false),
            stalled: AtomicUsize::new(0),
            release: Semaphore::new(0),
        })
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make later puts wait until [`Self::release_puts`]. Release is final.
    pub fn stall_puts(&self) {
        self.stall_puts.store(true, Ordering::SeqCst);
    }

    pub fn release_puts(&self) {
        self.stall_puts.store(false, Ordering::SeqCst);
        // Closing wakes every waiter at once.
        self.release.close();
    }

    /// Puts currently waiting to be released.
    pub fn stalled_puts(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected read failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.check_read()?;
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected write failure")));
        }
        if self.stall_puts.load(Ordering::SeqCst) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.acquire().await;
            self.stalled.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
