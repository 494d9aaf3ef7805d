//! Sinks: persist rendered records as loose files or as entries of one archive.
//!
//! Rendering always happens before anything touches the destination, so a
//! failed render never leaves a partial document behind.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::contract::{Record, Sink};
use crate::error::SinkError;
use crate::render::{join_lines, Render};

fn render_record(
    renderer: &dyn Render,
    separator: &str,
    record: &Record,
) -> Result<Vec<u8>, SinkError> {
    let text = join_lines(&record.lines, separator);
    renderer.render(&text).map_err(|source| SinkError::Render {
        key: record.key.clone(),
        source,
    })
}

/// A staging file in `dir`, created with the mode a plain `File::create` would get.
fn staging_file(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Narrowed by the process umask at creation.
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

/// Give the staged replacement the permissions of the file it replaces, if any.
fn keep_target_permissions(staged: &NamedTempFile, target: &Path) -> io::Result<()> {
    match std::fs::metadata(target) {
        Ok(meta) => staged.as_file().set_permissions(meta.permissions()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Add one complete entry. A failed body write removes the entry again.
fn write_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
    options: SimpleFileOptions,
) -> ZipResult<()> {
    writer.start_file(name, options)?;
    if let Err(e) = writer.write_all(bytes) {
        writer.abort_file()?;
        return Err(e.into());
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Writes `<key>.<ext>` files into a destination directory, replacing existing ones.
pub struct DirectorySink {
    dir: PathBuf,
    renderer: Box<dyn Render>,
    separator: String,
    finished: bool,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, renderer: Box<dyn Render>, separator: String) -> Self {
        Self {
            dir: dir.into(),
            renderer,
            separator,
            finished: false,
        }
    }

    pub fn target_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key, self.renderer.extension()))
    }
}

impl Sink for DirectorySink {
    fn write(&mut self, record: Record) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        let bytes = render_record(self.renderer.as_ref(), &self.separator, &record)?;
        let target = self.target_path(&record.key);

        // Write next to the target, then rename over it.
        let mut tmp = staging_file(&self.dir).map_err(|e| SinkError::io(&self.dir, e))?;
        tmp.write_all(&bytes)
            .map_err(|e| SinkError::io(tmp.path(), e))?;
        keep_target_permissions(&tmp, &target).map_err(|e| SinkError::io(&target, e))?;
        tmp.persist(&target)
            .map_err(|e| SinkError::io(&target, e.error))?;

        info!(path = %target.display(), bytes = bytes.len(), "Document written");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        self.finished = true;
        Ok(())
    }
}

/// Writes every record as an entry `<key>.<ext>` of one output archive.
///
/// Entries are staged in a temporary archive beside the destination. On
/// [`Sink::finish`] the entries of a pre-existing destination that were not
/// rewritten during the run are carried over, and the staged archive
/// replaces the destination in one rename.
pub struct ArchiveSink {
    path: PathBuf,
    renderer: Box<dyn Render>,
    separator: String,
    writer: Option<ZipWriter<NamedTempFile>>,
    written: HashSet<String>,
    has_existing: bool,
}

impl ArchiveSink {
    pub fn create(
        path: impl Into<PathBuf>,
        renderer: Box<dyn Render>,
        separator: String,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        let has_existing = path.is_file();
        if has_existing {
            // Refuse to start a run whose existing archive could not be carried over.
            let file = File::open(&path).map_err(|e| SinkError::io(&path, e))?;
            zip::ZipArchive::new(file).map_err(|e| SinkError::archive(&path, e))?;
            debug!(path = %path.display(), "Updating existing archive");
        }
        let staging = parent_dir(&path);
        let tmp = staging_file(staging).map_err(|e| SinkError::io(staging, e))?;
        Ok(Self {
            writer: Some(ZipWriter::new(tmp)),
            path,
            renderer,
            separator,
            written: HashSet::new(),
            has_existing,
        })
    }

    pub fn entry_name(&self, key: &str) -> String {
        format!("{}.{}", key, self.renderer.extension())
    }

    fn carry_over_existing(&self, writer: &mut ZipWriter<NamedTempFile>) -> Result<usize, SinkError> {
        let file = File::open(&self.path).map_err(|e| SinkError::io(&self.path, e))?;
        let mut existing =
            zip::ZipArchive::new(file).map_err(|e| SinkError::archive(&self.path, e))?;
        let mut kept = 0;
        for i in 0..existing.len() {
            let entry = existing
                .by_index_raw(i)
                .map_err(|e| SinkError::archive(&self.path, e))?;
            if self.written.contains(entry.name()) {
                debug!(entry = %entry.name(), "Replacing existing archive entry");
                continue;
            }
            writer
                .raw_copy_file(entry)
                .map_err(|e| SinkError::archive(&self.path, e))?;
            kept += 1;
        }
        Ok(kept)
    }
}

impl Sink for ArchiveSink {
    fn write(&mut self, record: Record) -> Result<(), SinkError> {
        if self.writer.is_none() {
            return Err(SinkError::Finished);
        }
        let name = self.entry_name(&record.key);
        if self.written.contains(&name) {
            return Err(SinkError::DuplicateEntry { name });
        }
        let bytes = render_record(self.renderer.as_ref(), &self.separator, &record)?;

        let path = &self.path;
        let writer = self.writer.as_mut().ok_or(SinkError::Finished)?;
        write_entry(writer, &name, &bytes, SimpleFileOptions::default())
            .map_err(|e| SinkError::archive(path, e))?;

        info!(archive = %path.display(), entry = %name, bytes = bytes.len(), "Archive entry written");
        self.written.insert(name);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let mut writer = self.writer.take().ok_or(SinkError::Finished)?;
        if self.has_existing {
            let kept = self.carry_over_existing(&mut writer)?;
            debug!(kept, "Carried over untouched archive entries");
        }
        let tmp = writer
            .finish()
            .map_err(|e| SinkError::archive(&self.path, e))?;
        keep_target_permissions(&tmp, &self.path).map_err(|e| SinkError::io(&self.path, e))?;
        tmp.persist(&self.path).map_err(|e| {
            warn!(path = %self.path.display(), error = %e.error, "Failed to replace destination archive");
            SinkError::io(&self.path, e.error)
        })?;
        info!(
            archive = %self.path.display(),
            entries = self.written.len(),
            "Archive finalized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::render::PdfRenderer;
    use std::io::Read;
    use tempfile::tempdir;

    /// Renders the joined text verbatim so tests can inspect it.
    struct EchoRenderer;

    impl Render for EchoRenderer {
        fn extension(&self) -> &str {
            "txt"
        }

        fn render(&self, text: &str) -> Result<Vec<u8>, RenderError> {
            if text.contains("boom") {
                return Err(RenderError::Layout("boom".into()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    fn record(key: &str, lines: &[&str]) -> Record {
        Record::new(key, lines.iter().map(|l| l.to_string()).collect())
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut body = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        body
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        names
    }

    #[test]
    fn directory_sink_writes_and_overwrites_named_files() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("A.txt"), "stale").unwrap();
        let mut sink = DirectorySink::new(tmp.path(), Box::new(EchoRenderer), ", ".into());

        sink.write(record("A", &["x", "y"])).unwrap();
        sink.write(record("B", &["z"])).unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read_to_string(tmp.path().join("A.txt")).unwrap(), "x, y");
        assert_eq!(std::fs::read_to_string(tmp.path().join("B.txt")).unwrap(), "z");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn directory_sink_render_failure_leaves_no_file() {
        let tmp = tempdir().unwrap();
        let mut sink = DirectorySink::new(tmp.path(), Box::new(EchoRenderer), ", ".into());
        let err = sink.write(record("C", &["boom"])).unwrap_err();
        assert!(matches!(err, SinkError::Render { ref key, .. } if key == "C"));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn directory_sink_produces_pdf_files() {
        let tmp = tempdir().unwrap();
        let mut sink =
            DirectorySink::new(tmp.path(), Box::new(PdfRenderer::default()), ", ".into());
        sink.write(record("A", &["x", "y"])).unwrap();
        let bytes = std::fs::read(tmp.path().join("A.pdf")).unwrap();
        assert_eq!(&bytes[0..4], b"%PDF");
    }

    #[test]
    fn archive_sink_creates_archive_with_one_entry_per_record() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        let mut sink = ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.write(record("A", &["x", "y"])).unwrap();
        sink.write(record("B", &["z"])).unwrap();
        sink.finish().unwrap();

        assert_eq!(entry_names(&path), vec!["A.txt", "B.txt"]);
        assert_eq!(read_entry(&path, "A.txt"), "x, y");
        assert_eq!(read_entry(&path, "B.txt"), "z");
    }

    #[test]
    fn archive_sink_rewrites_existing_entries_and_keeps_the_rest() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        {
            let mut zw = ZipWriter::new(File::create(&path).unwrap());
            zw.start_file("A.txt", SimpleFileOptions::default()).unwrap();
            zw.write_all(b"old A").unwrap();
            zw.start_file("keep.txt", SimpleFileOptions::default()).unwrap();
            zw.write_all(b"untouched").unwrap();
            zw.finish().unwrap();
        }

        let mut sink = ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.write(record("A", &["new"])).unwrap();
        sink.finish().unwrap();

        assert_eq!(entry_names(&path), vec!["A.txt", "keep.txt"]);
        assert_eq!(read_entry(&path, "A.txt"), "new");
        assert_eq!(read_entry(&path, "keep.txt"), "untouched");
    }

    #[test]
    fn archive_sink_rejects_duplicate_key_within_a_run() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        let mut sink = ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.write(record("A", &["x"])).unwrap();
        assert!(matches!(
            sink.write(record("A", &["y"])),
            Err(SinkError::DuplicateEntry { .. })
        ));
        sink.finish().unwrap();
        assert_eq!(read_entry(&path, "A.txt"), "x");
    }

    #[test]
    fn archive_sink_render_failure_skips_entry_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        let mut sink = ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
        assert!(sink.write(record("bad", &["boom"])).is_err());
        sink.write(record("good", &["fine"])).unwrap();
        sink.finish().unwrap();
        assert_eq!(entry_names(&path), vec!["good.txt"]);
    }

    #[test]
    fn archive_sink_is_not_reusable_after_finish() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        let mut sink = ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.finish().unwrap();
        assert!(matches!(sink.write(record("A", &["x"])), Err(SinkError::Finished)));
        assert!(matches!(sink.finish(), Err(SinkError::Finished)));
        assert!(entry_names(&path).is_empty());
    }

    #[test]
    fn archive_sink_refuses_corrupt_existing_archive() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()),
            Err(SinkError::Archive { .. })
        ));
    }

    /// In-memory archive target whose first write reaching past `fail_at` errors.
    struct FlakyWriter {
        inner: std::io::Cursor<Vec<u8>>,
        fail_at: u64,
        tripped: bool,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.tripped && self.inner.position() + buf.len() as u64 > self.fail_at {
                self.tripped = true;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FlakyWriter {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn failed_entry_body_is_dropped_from_the_archive() {
        let stored =
            || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut zw = ZipWriter::new(FlakyWriter {
            inner: std::io::Cursor::new(Vec::new()),
            fail_at: 100,
            tripped: false,
        });

        assert!(write_entry(&mut zw, "A.txt", &[b'a'; 1000], stored()).is_err());
        write_entry(&mut zw, "B.txt", b"fine", stored()).unwrap();
        let target = zw.finish().unwrap();

        let mut archive = zip::ZipArchive::new(target.inner).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        assert_eq!(names, vec!["B.txt"]);
        let mut body = String::new();
        archive
            .by_name("B.txt")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "fine");
    }

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[test]
    fn directory_sink_keeps_existing_mode_and_uses_regular_mode_for_new_files() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().unwrap();
        let existing = tmp.path().join("A.txt");
        std::fs::write(&existing, "stale").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o640)).unwrap();
        let reference = tmp.path().join("reference");
        File::create(&reference).unwrap();

        let mut sink = DirectorySink::new(tmp.path(), Box::new(EchoRenderer), ", ".into());
        sink.write(record("A", &["x"])).unwrap();
        sink.write(record("B", &["y"])).unwrap();
        sink.finish().unwrap();

        assert_eq!(mode(&existing), 0o640);
        assert_eq!(mode(&tmp.path().join("B.txt")), mode(&reference));
    }

    #[cfg(unix)]
    #[test]
    fn archive_sink_keeps_existing_mode_and_uses_regular_mode_for_new_archives() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().unwrap();
        let reference = tmp.path().join("reference");
        File::create(&reference).unwrap();

        let fresh = tmp.path().join("fresh.zip");
        let mut sink = ArchiveSink::create(&fresh, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.write(record("A", &["x"])).unwrap();
        sink.finish().unwrap();
        assert_eq!(mode(&fresh), mode(&reference));

        std::fs::set_permissions(&fresh, std::fs::Permissions::from_mode(0o640)).unwrap();
        let mut sink = ArchiveSink::create(&fresh, Box::new(EchoRenderer), ", ".into()).unwrap();
        sink.write(record("B", &["y"])).unwrap();
        sink.finish().unwrap();
        assert_eq!(mode(&fresh), 0o640);
        assert_eq!(entry_names(&fresh), vec!["A.txt", "B.txt"]);
    }

    #[test]
    fn unfinished_archive_sink_leaves_no_output() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("out.zip");
        {
            let mut sink =
                ArchiveSink::create(&path, Box::new(EchoRenderer), ", ".into()).unwrap();
            sink.write(record("A", &["x"])).unwrap();
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
