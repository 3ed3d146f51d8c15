use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::tftp::consts;

/// Where a file's bytes come from. Only `OnDisk` is implemented; `Online`
/// is reserved per spec.md §4.2 and currently has no caller that selects
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
	OnDisk,
	Online,
}

/// Why a fetch failed, distinguished internally so callers can pick the
/// right ERROR code (spec.md §9's path-safety item: a traversal attempt
/// must fail distinctly from an ordinary missing file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
	NotFound,
	AccessViolation,
	Unsupported,
}

type CacheKey = (SourceKind, PathBuf);

/// Bounded LRU memoization cache over fetched file contents, keyed by
/// `(SourceKind, resolved_path)`, per spec.md §4.2. Hand-rolled because no
/// crate in the reference stack supplies one; this is core domain logic
/// (the spec mandates a bounded, evicting cache), not an ambient concern.
struct LruCache {
	capacity: usize,
	entries: HashMap<CacheKey, Arc<Vec<u8>>>,
	/// Most-recently-used key at the back.
	order: VecDeque<CacheKey>,
}

impl LruCache {
	fn new(capacity: usize) -> Self {
		Self { capacity, entries: HashMap::new(), order: VecDeque::new() }
	}

	fn get(&mut self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
		let value = self.entries.get(key)?.clone();
		self.touch(key);
		Some(value)
	}

	fn insert(&mut self, key: CacheKey, value: Arc<Vec<u8>>) {
		if self.entries.insert(key.clone(), value).is_some() {
			self.touch(&key);
			return;
		}
		self.order.push_back(key);
		if self.entries.len() > self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.entries.remove(&oldest);
			}
		}
	}

	fn touch(&mut self, key: &CacheKey) {
		if let Some(pos) = self.order.iter().position(|k| k == key) {
			let k = self.order.remove(pos).unwrap();
			self.order.push_back(k);
		}
	}
}

/// Fetches file contents by logical name under a fixed base directory,
/// memoizing recent results. Concurrent misses for the same key may each
/// read the file once before the cache converges on one entry; harmless,
/// since reads are idempotent. Cache coherence with the filesystem is
/// best-effort, per spec.md §4.2: a modification to an on-disk file is not
/// required to invalidate the cache mid-process.
pub struct FileProvider {
	base_dir: PathBuf,
	cache: Arc<Mutex<LruCache>>,
}

impl FileProvider {
	pub fn new(base_dir: PathBuf) -> Self {
		Self { base_dir, cache: Arc::new(Mutex::new(LruCache::new(consts::FILE_CACHE_CAPACITY))) }
	}

	/// Resolve `logical_path` under the base directory and reject any
	/// attempt to escape it via `..` or an absolute path, per spec.md §6/§9.
	pub fn resolve(&self, logical_path: &str) -> Result<PathBuf, FetchError> {
		let candidate = self.base_dir.join(logical_path);

		let canonical_base = self.base_dir.canonicalize().map_err(|_| FetchError::NotFound)?;
		let canonical = candidate.canonicalize().map_err(|_| FetchError::NotFound)?;

		if !canonical.starts_with(&canonical_base) {
			return Err(FetchError::AccessViolation);
		}
		Ok(canonical)
	}

	/// Fetch the bytes for `logical_path`, going through the LRU cache.
	/// Returns `FetchError::NotFound` if the resolved path does not exist,
	/// is not a regular file, or is unreadable.
	pub async fn fetch(&self, source: SourceKind, logical_path: &str) -> Result<Arc<Vec<u8>>, FetchError> {
		if source != SourceKind::OnDisk {
			return Err(FetchError::Unsupported);
		}

		let path = self.resolve(logical_path)?;
		let key: CacheKey = (source, path.clone());

		if let Some(cached) = self.cache.lock().await.get(&key) {
			return Ok(cached);
		}

		let bytes = read_on_disk(&path).await?;
		let bytes = Arc::new(bytes);
		self.cache.lock().await.insert(key, bytes.clone());
		Ok(bytes)
	}
}

async fn read_on_disk(path: &Path) -> Result<Vec<u8>, FetchError> {
	let metadata = tokio::fs::metadata(path).await.map_err(|_| FetchError::NotFound)?;
	if !metadata.is_file() {
		return Err(FetchError::NotFound);
	}
	tokio::fs::read(path).await.map_err(|e| match e.kind() {
		std::io::ErrorKind::PermissionDenied => FetchError::AccessViolation,
		_ => FetchError::NotFound,
	})
}
