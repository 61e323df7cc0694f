//! Streamed tar archives of directory trees
//!
//! A worker thread walks the tree and writes the archive through the
//! selected codec into fixed-size chunks, handed to the consumer over a
//! channel with room for a single chunk. Memory use stays bounded whatever
//! the size of the tree.

use crate::exclude::ExcludeFilter;
use crate::guard::{is_within, realpath};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use walkdir::WalkDir;

/// Mimetype of every archive, whatever the codec
pub const TAR_MIMETYPE: &str = "application/x-tar";

/// Below this chunk size compression is not worth it and is disabled
const MIN_COMPRESSION_BUFFSIZE: usize = 16;

/// Archive codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TarCompression {
    None,
    #[default]
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    pub fn extension(self) -> &'static str {
        match self {
            TarCompression::None => "tar",
            TarCompression::Gzip => "tgz",
            TarCompression::Bzip2 => "tar.bz2",
            TarCompression::Xz => "tar.xz",
        }
    }

    /// Content encoding name, none for plain tar
    pub fn encoding(self) -> Option<&'static str> {
        match self {
            TarCompression::None => None,
            TarCompression::Gzip => Some("gzip"),
            TarCompression::Bzip2 => Some("bzip2"),
            TarCompression::Xz => Some("xz"),
        }
    }
}

impl FromStr for TarCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "tar" => Ok(TarCompression::None),
            "gzip" | "gz" | "tgz" => Ok(TarCompression::Gzip),
            "bzip2" | "bz2" => Ok(TarCompression::Bzip2),
            "xz" => Ok(TarCompression::Xz),
            other => Err(format!("unknown compression: {}", other)),
        }
    }
}

/// Archive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TarOptions {
    /// Chunk size handed to the consumer, in bytes
    pub buffsize: usize,
    pub compression: TarCompression,
    /// Codec level, clamped to what the codec accepts
    pub level: u32,
}

impl Default for TarOptions {
    fn default() -> Self {
        Self {
            buffsize: 10240,
            compression: TarCompression::Gzip,
            level: 1,
        }
    }
}

impl TarOptions {
    /// Codec actually used
    pub fn effective_compression(&self) -> TarCompression {
        if self.buffsize < MIN_COMPRESSION_BUFFSIZE {
            TarCompression::None
        } else {
            self.compression
        }
    }
}

/// Splits the archive into chunks of exactly `buffsize` bytes
struct ChunkSender {
    buffer: Vec<u8>,
    buffsize: usize,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
}

impl ChunkSender {
    fn new(tx: Sender<Vec<u8>>, buffsize: usize, stop: Arc<AtomicBool>) -> Self {
        let buffsize = buffsize.max(1);
        Self {
            buffer: Vec::with_capacity(buffsize),
            buffsize,
            tx,
            stop,
        }
    }

    fn send(&self, chunk: Vec<u8>) -> io::Result<()> {
        self.tx
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }

    /// Hand over the remainder
    fn finish(mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let chunk = std::mem::take(&mut self.buffer);
            self.send(chunk)?;
        }
        Ok(())
    }
}

impl Write for ChunkSender {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive stream closed"));
        }

        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= self.buffsize {
            let rest = self.buffer.split_off(self.buffsize);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            self.send(chunk)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Encoder {
    Plain(ChunkSender),
    Gzip(flate2::write::GzEncoder<ChunkSender>),
    Bzip2(bzip2::write::BzEncoder<ChunkSender>),
    Xz(xz2::write::XzEncoder<ChunkSender>),
}

impl Encoder {
    fn new(sink: ChunkSender, compression: TarCompression, level: u32) -> Self {
        match compression {
            TarCompression::None => Encoder::Plain(sink),
            TarCompression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                sink,
                flate2::Compression::new(level.min(9)),
            )),
            TarCompression::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                sink,
                bzip2::Compression::new(level.clamp(1, 9)),
            )),
            TarCompression::Xz => Encoder::Xz(xz2::write::XzEncoder::new(sink, level.min(9))),
        }
    }

    fn finish(self) -> io::Result<ChunkSender> {
        match self {
            Encoder::Plain(sink) => Ok(sink),
            Encoder::Gzip(e) => e.finish(),
            Encoder::Bzip2(e) => e.finish(),
            Encoder::Xz(e) => e.finish(),
        }
    }
}

impl Write for Encoder {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(data),
            Encoder::Gzip(w) => w.write(data),
            Encoder::Bzip2(w) => w.write(data),
            Encoder::Xz(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
            Encoder::Bzip2(w) => w.flush(),
            Encoder::Xz(w) => w.flush(),
        }
    }
}

/// Lazily produced archive of a directory
///
/// Iterating yields chunks of exactly `buffsize` bytes except the last one.
/// A failure of the producer is reported as the final item. Dropping the
/// stream early stops the producer.
pub struct TarStream {
    path: PathBuf,
    exclude: Arc<dyn ExcludeFilter>,
    options: TarOptions,
    stop: Arc<AtomicBool>,
    receiver: Option<Receiver<Vec<u8>>>,
    worker: Option<JoinHandle<io::Result<()>>>,
    finished: bool,
}

impl TarStream {
    pub fn new(path: impl Into<PathBuf>, exclude: Arc<dyn ExcludeFilter>, options: TarOptions) -> Self {
        Self {
            path: path.into(),
            exclude,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            receiver: None,
            worker: None,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Suggested download filename, `<dirname>.<ext>`
    pub fn name(&self) -> String {
        let dirname = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        format!("{}.{}", dirname, self.options.effective_compression().extension())
    }

    pub fn mimetype(&self) -> &'static str {
        TAR_MIMETYPE
    }

    pub fn encoding(&self) -> Option<&'static str> {
        self.options.effective_compression().encoding()
    }

    /// Stop the producer and release the channel
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.receiver = None;
        self.finished = true;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn start(&mut self) -> io::Result<()> {
        let (tx, rx) = bounded(1);
        let path = self.path.clone();
        let exclude = Arc::clone(&self.exclude);
        let options = self.options.clone();
        let stop = Arc::clone(&self.stop);

        tracing::debug!(
            "Starting archive of {:?} ({:?}, {} byte chunks)",
            path,
            options.effective_compression(),
            options.buffsize
        );

        let worker = std::thread::Builder::new()
            .name("tar-stream".to_string())
            .spawn(move || write_archive(&path, exclude.as_ref(), &options, tx, stop))?;

        self.receiver = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn join_worker(&mut self) -> io::Result<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "archive worker panicked"))),
            None => Ok(()),
        }
    }
}

impl Iterator for TarStream {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.worker.is_none() {
            if let Err(e) = self.start() {
                self.finished = true;
                return Some(Err(e));
            }
        }

        if let Some(rx) = &self.receiver {
            if let Ok(chunk) = rx.recv() {
                return Some(Ok(chunk));
            }
        }

        // Channel closed: the producer is done
        self.finished = true;
        self.receiver = None;
        match self.join_worker() {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                tracing::error!("Archive of {:?} failed: {}", self.path, e);
                Some(Err(e))
            }
            _ => None,
        }
    }
}

impl Drop for TarStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TarStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarStream")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Producer side, runs on the worker thread
fn write_archive(
    root: &Path,
    exclude: &dyn ExcludeFilter,
    options: &TarOptions,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) -> io::Result<()> {
    let sink = ChunkSender::new(tx, options.buffsize, Arc::clone(&stop));
    let encoder = Encoder::new(sink, options.effective_compression(), options.level);

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    if let Err(e) = append_tree(&mut builder, root, exclude, &stop) {
        // Keep the builder's trailer out of the channel
        stop.store(true, Ordering::Relaxed);
        return Err(e);
    }

    let encoder = builder.into_inner()?;
    let sink = encoder.finish()?;
    sink.finish()?;

    tracing::debug!("Archive of {:?} complete", root);
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    exclude: &dyn ExcludeFilter,
    stop: &AtomicBool,
) -> io::Result<()> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclude.is_excluded(e.path(), e.path_is_symlink()));

    for entry in walker {
        if stop.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive stream closed"));
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.io_error().map(|e| e.kind()) != Some(io::ErrorKind::NotFound) {
                    tracing::warn!("Skipping unreadable entry while archiving {:?}: {}", root, e);
                }
                continue;
            }
        };

        let path = entry.path();
        if entry.path_is_symlink() && !is_within(realpath(path), root) {
            tracing::debug!("Skipping symlink {:?} pointing outside {:?}", path, root);
            continue;
        }

        let name = match path.strip_prefix(root) {
            Ok(name) => name,
            Err(_) => continue,
        };

        match builder.append_path_with_name(path, name) {
            Ok(()) => {}
            // Sink failures end the archive, the consumer is gone
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe || stop.load(Ordering::Relaxed) => {
                return Err(e);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("{:?} vanished while archiving", path);
            }
            Err(e) => {
                tracing::warn!("Skipping {:?} while archiving: {}", path, e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn no_exclude() -> Arc<dyn ExcludeFilter> {
        Arc::new(|_: &Path| false)
    }

    fn sample_tree() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap().join("music");
        fs::create_dir_all(root.join("album")).unwrap();
        fs::create_dir_all(root.join("secret")).unwrap();
        fs::write(root.join("album").join("track.ogg"), vec![7u8; 3000]).unwrap();
        fs::write(root.join("readme.txt"), b"hello archive").unwrap();
        fs::write(root.join("secret").join("key"), b"hidden").unwrap();
        (dir, root)
    }

    fn collect(stream: TarStream) -> Vec<u8> {
        stream.flat_map(|chunk| chunk.unwrap()).collect()
    }

    fn entries<R: Read>(reader: R) -> Vec<(PathBuf, tar::EntryType, Vec<u8>)> {
        let mut archive = tar::Archive::new(reader);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().into_owned();
                let kind = entry.header().entry_type();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (path, kind, data)
            })
            .collect()
    }

    fn find<'a>(
        entries: &'a [(PathBuf, tar::EntryType, Vec<u8>)],
        name: &str,
    ) -> Option<&'a (PathBuf, tar::EntryType, Vec<u8>)> {
        entries.iter().find(|(path, _, _)| path == Path::new(name))
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(TarCompression::None.extension(), "tar");
        assert_eq!(TarCompression::Gzip.extension(), "tgz");
        assert_eq!(TarCompression::Bzip2.extension(), "tar.bz2");
        assert_eq!(TarCompression::Xz.extension(), "tar.xz");
        assert_eq!(TarCompression::Gzip.encoding(), Some("gzip"));
        assert_eq!(TarCompression::None.encoding(), None);
        assert_eq!("bz2".parse::<TarCompression>(), Ok(TarCompression::Bzip2));
        assert!("zip".parse::<TarCompression>().is_err());
    }

    #[test]
    fn test_plain_multi_chunk_round_trip() {
        let (_dir, root) = sample_tree();
        let options = TarOptions {
            buffsize: 512,
            compression: TarCompression::None,
            level: 1,
        };

        let stream = TarStream::new(&root, no_exclude(), options);
        assert_eq!(stream.name(), "music.tar");
        assert_eq!(stream.encoding(), None);

        let chunks: Vec<Vec<u8>> = stream.map(|c| c.unwrap()).collect();
        assert!(chunks.len() > 2);
        let (last, full) = chunks.split_last().unwrap();
        assert!(full.iter().all(|c| c.len() == 512));
        assert!(!last.is_empty() && last.len() <= 512);

        let data: Vec<u8> = chunks.concat();
        let entries = entries(data.as_slice());

        let (_, kind, content) = find(&entries, "album/track.ogg").unwrap();
        assert_eq!(*kind, tar::EntryType::Regular);
        assert_eq!(content, &vec![7u8; 3000]);
        assert_eq!(find(&entries, "readme.txt").unwrap().2, b"hello archive");
        assert_eq!(find(&entries, "album").unwrap().1, tar::EntryType::Directory);
        assert!(find(&entries, "music").is_none());
    }

    #[test]
    fn test_gzip_round_trip() {
        let (_dir, root) = sample_tree();
        let stream = TarStream::new(&root, no_exclude(), TarOptions::default());
        assert_eq!(stream.name(), "music.tgz");
        assert_eq!(stream.encoding(), Some("gzip"));
        assert_eq!(stream.mimetype(), "application/x-tar");

        let data = collect(stream);
        let entries = entries(flate2::read::GzDecoder::new(data.as_slice()));
        assert_eq!(find(&entries, "readme.txt").unwrap().2, b"hello archive");
    }

    #[test]
    fn test_bzip2_and_xz_round_trip() {
        let (_dir, root) = sample_tree();

        let options = TarOptions {
            compression: TarCompression::Bzip2,
            level: 9,
            ..TarOptions::default()
        };
        let data = collect(TarStream::new(&root, no_exclude(), options));
        let bz = entries(bzip2::read::BzDecoder::new(data.as_slice()));
        assert!(find(&bz, "album/track.ogg").is_some());

        let options = TarOptions {
            compression: TarCompression::Xz,
            ..TarOptions::default()
        };
        let data = collect(TarStream::new(&root, no_exclude(), options));
        let xz = entries(xz2::read::XzDecoder::new(data.as_slice()));
        assert!(find(&xz, "album/track.ogg").is_some());
    }

    #[test]
    fn test_small_buffer_disables_compression() {
        let (_dir, root) = sample_tree();
        let options = TarOptions {
            buffsize: 8,
            compression: TarCompression::Gzip,
            level: 1,
        };

        let stream = TarStream::new(&root, no_exclude(), options);
        assert_eq!(stream.name(), "music.tar");
        assert_eq!(stream.encoding(), None);

        let data = collect(stream);
        let entries = entries(data.as_slice());
        assert!(find(&entries, "readme.txt").is_some());
    }

    #[test]
    fn test_excluded_subtree_pruned() {
        let (_dir, root) = sample_tree();
        let exclude: Arc<dyn ExcludeFilter> = Arc::new(|p: &Path| p.ends_with("secret"));
        let options = TarOptions {
            compression: TarCompression::None,
            ..TarOptions::default()
        };

        let data = collect(TarStream::new(&root, exclude, options));
        let entries = entries(data.as_slice());
        assert!(find(&entries, "secret").is_none());
        assert!(find(&entries, "secret/key").is_none());
        assert!(find(&entries, "readme.txt").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_kept_as_links_and_escapes_skipped() {
        let (_dir, root) = sample_tree();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("passwd"), b"root").unwrap();
        std::os::unix::fs::symlink(outside.path().join("passwd"), root.join("escape")).unwrap();
        std::os::unix::fs::symlink("readme.txt", root.join("alias")).unwrap();

        let options = TarOptions {
            compression: TarCompression::None,
            ..TarOptions::default()
        };
        let data = collect(TarStream::new(&root, no_exclude(), options));

        let mut archive = tar::Archive::new(data.as_slice());
        let mut alias_target = None;
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            if path == Path::new("alias") {
                assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
                alias_target = entry.link_name().unwrap().map(|l| l.into_owned());
            }
            names.push(path);
        }

        assert_eq!(alias_target, Some(PathBuf::from("readme.txt")));
        assert!(!names.iter().any(|n| n == Path::new("escape")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unarchivable_entry_skipped() {
        let (_dir, root) = sample_tree();
        let _socket = std::os::unix::net::UnixListener::bind(root.join("a.sock")).unwrap();
        let options = TarOptions {
            compression: TarCompression::None,
            ..TarOptions::default()
        };

        let chunks: Vec<io::Result<Vec<u8>>> = TarStream::new(&root, no_exclude(), options).collect();
        assert!(chunks.iter().all(|c| c.is_ok()));

        let data: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        let entries = entries(data.as_slice());
        assert!(find(&entries, "a.sock").is_none());
        assert_eq!(find(&entries, "readme.txt").unwrap().2, b"hello archive");
        assert!(find(&entries, "secret/key").is_some());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let options = TarOptions {
            compression: TarCompression::None,
            ..TarOptions::default()
        };

        let data = collect(TarStream::new(dir.path(), no_exclude(), options));
        // End-of-archive marker only
        assert_eq!(data.len(), 1024);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_early_drop_stops_worker() {
        let (_dir, root) = sample_tree();
        fs::write(root.join("large.bin"), vec![1u8; 1 << 20]).unwrap();
        let options = TarOptions {
            buffsize: 512,
            compression: TarCompression::None,
            level: 1,
        };

        let mut stream = TarStream::new(&root, no_exclude(), options);
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.len(), 512);

        stream.close();
        assert!(stream.next().is_none());
    }
}
