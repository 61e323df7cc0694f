//! Subcommand implementations
//!
//! Every command writes its normal output to `out`, so the binary can hand
//! in stdout and tests a buffer.

use app_core::{AppError, AppState};
use app_fs::{secure_filename, FsError, FsNode, Node, SortBy, TarStream, TargetOs};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Attributes printed by `info`
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    pub urlpath: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: Option<String>,
    pub modified: Option<String>,
    pub mimetype: String,
    pub media_type: String,
    pub category: String,
    pub encoding: String,
    pub is_symlink: bool,
    pub can_remove: bool,
    pub can_upload: bool,
    pub can_download: bool,
}

impl NodeInfo {
    fn from_node(node: &Node) -> Result<Self, AppError> {
        let dir = node.as_directory();
        Ok(Self {
            urlpath: node.urlpath()?,
            name: node.name(),
            kind: if node.is_directory() { "directory" } else { "file" },
            size: node.size(),
            modified: node.modified(),
            mimetype: node.mimetype().to_string(),
            media_type: node.media_type().to_string(),
            category: node.category().to_string(),
            encoding: node.encoding().to_string(),
            is_symlink: node.is_symlink(),
            can_remove: node.can_remove(),
            can_upload: dir.map_or(false, |d| d.can_upload()),
            can_download: dir.map_or(false, |d| d.can_download()),
        })
    }
}

fn resolve_directory<'a>(node: &'a Node, urlpath: &str) -> Result<&'a app_fs::DirectoryNode, AppError> {
    node.as_directory()
        .ok_or_else(|| AppError::BadRequest(format!("Not a directory: {}", urlpath)))
}

fn listing_line(node: &Node) -> String {
    let name = if node.is_directory() {
        format!("{}/", node.name())
    } else {
        node.name()
    };
    format!(
        "{} {:>10}  {:<19}  {}",
        if node.is_directory() { 'd' } else { '-' },
        node.size().unwrap_or_default(),
        node.modified().unwrap_or_default(),
        name
    )
}

/// `ls [PATH] [--sort PROP]`
pub fn ls<W: Write>(
    state: &AppState,
    path: Option<&str>,
    sort: Option<&str>,
    out: &mut W,
) -> Result<(), AppError> {
    let urlpath = match path {
        Some(path) => path.to_string(),
        None => state.start_urlpath()?,
    };

    let order = match sort {
        Some(property) => Some(
            SortBy::parse_property(property)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown sort property: {}", property)))?,
        ),
        None => state.default_sort(),
    };

    let node = state.context.resolve(&urlpath)?;
    let dir = match node.as_directory() {
        Some(dir) => dir,
        None => {
            writeln!(out, "{}", listing_line(&node))?;
            return Ok(());
        }
    };

    let (sort, reverse) = match order {
        Some((sort, reverse)) => (Some(sort), reverse),
        None => (None, false),
    };
    for child in dir.listdir(sort, reverse)? {
        writeln!(out, "{}", listing_line(child))?;
    }
    Ok(())
}

/// `info PATH [--json]`
pub fn info<W: Write>(state: &AppState, path: &str, json: bool, out: &mut W) -> Result<(), AppError> {
    let node = state.context.resolve(path)?;
    let info = NodeInfo::from_node(&node)?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &info)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "Path:      /{}", info.urlpath)?;
    writeln!(out, "Type:      {}", info.kind)?;
    if let Some(size) = &info.size {
        writeln!(out, "Size:      {}", size)?;
    }
    if let Some(modified) = &info.modified {
        writeln!(out, "Modified:  {}", modified)?;
    }
    writeln!(out, "Mimetype:  {}", info.mimetype)?;
    if info.is_symlink {
        writeln!(out, "Symlink:   yes")?;
    }
    let mut allowed = Vec::new();
    if info.can_remove {
        allowed.push("remove");
    }
    if info.can_upload {
        allowed.push("upload");
    }
    if info.can_download {
        allowed.push("download");
    }
    if !allowed.is_empty() {
        writeln!(out, "Allowed:   {}", allowed.join(", "))?;
    }
    Ok(())
}

/// Archive stream of the directory at `path`, the start directory by default
pub fn open_archive(state: &AppState, path: Option<&str>) -> Result<TarStream, AppError> {
    let urlpath = match path {
        Some(path) => path.to_string(),
        None => state.start_urlpath()?,
    };
    let node = state.context.resolve(&urlpath)?;
    let stream = resolve_directory(&node, &urlpath)?.download()?;
    tracing::info!("Downloading {:?} as {}", node.path(), stream.name());
    Ok(stream)
}

/// Copy every chunk of `stream` to `out`
///
/// A closed reader stops the archive without an error.
pub fn write_archive<W: Write>(mut stream: TarStream, out: &mut W) -> Result<u64, AppError> {
    let mut written = 0u64;
    while let Some(chunk) = stream.next() {
        // Producer errors name archived paths, report them like library errors
        let chunk = chunk.map_err(FsError::from)?;
        match out.write_all(&chunk) {
            Ok(()) => written += chunk.len() as u64,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("Reader went away after {} bytes", written);
                stream.close();
                return Ok(written);
            }
            Err(e) => return Err(e.into()),
        }
    }
    out.flush()?;
    Ok(written)
}

/// Where `download -o` writes: a directory receives the archive's own name
pub fn archive_target(output: &Path, stream: &TarStream) -> PathBuf {
    if output.is_dir() {
        output.join(stream.name())
    } else {
        output.to_path_buf()
    }
}

/// `rm PATH`
pub fn rm<W: Write>(state: &AppState, path: &str, out: &mut W) -> Result<(), AppError> {
    let node = state.context.resolve(path)?;
    node.remove()?;
    writeln!(out, "removed {}", path)?;
    Ok(())
}

/// `upload DIR FILE...`, prints the stored names
pub fn upload<W: Write>(
    state: &AppState,
    dir: &str,
    files: &[PathBuf],
    out: &mut W,
) -> Result<(), AppError> {
    let node = state.context.resolve(dir)?;
    let target = resolve_directory(&node, dir)?;

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::BadRequest(format!("Not a file: {:?}", file)))?;
        let mut reader = File::open(file)?;
        let stored = target.upload(&name, &mut reader)?;
        writeln!(out, "{}", stored)?;
    }
    Ok(())
}

/// `mkdir DIR NAME`
pub fn mkdir<W: Write>(state: &AppState, dir: &str, name: &str, out: &mut W) -> Result<(), AppError> {
    let node = state.context.resolve(dir)?;
    let created = resolve_directory(&node, dir)?.create_directory(name)?;
    writeln!(out, "{}", created)?;
    Ok(())
}

/// `sanitize NAME [--windows]`, needs no base directory
pub fn sanitize<W: Write>(name: &str, windows: bool, fs_encoding: &str, out: &mut W) -> Result<(), AppError> {
    let target = if windows { TargetOs::Windows } else { TargetOs::current() };
    let filename = secure_filename(name, target, fs_encoding);
    if filename.is_empty() {
        return Err(AppError::BadRequest(format!("No usable filename in {:?}", name)));
    }
    writeln!(out, "{}", filename)?;
    Ok(())
}
