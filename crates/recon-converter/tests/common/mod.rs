//! Shared fixtures for integration tests
//!
//! - [`MemoryStore`] / [`MemoryConnector`]: in-memory remote hosts with
//!   failure injection and session accounting
//! - [`RecordingNotifier`]: captures every notification
//! - [`xlsx`]: builds minimal XLSX workbooks

#![allow(dead_code)]

use recon_common::FailureKind;
use recon_converter::config::ChannelConfig;
use recon_converter::convert::ChannelProfile;
use recon_converter::notify::{self, Notifier};
use recon_converter::remote::{
    remote_path, RemoteConnector, RemoteEndpoint, RemoteEntry, RemoteError, RemoteSession,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

pub const SOURCE_HOST: &str = "source.test";
pub const DESTINATION_HOST: &str = "destination.test";

// ============================================================================
// In-memory remote store
// ============================================================================

type UploadFilter = Box<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
struct StoreState {
    files: BTreeMap<String, (Vec<u8>, SystemTime)>,
    dirs: BTreeSet<String>,
    /// Listed but not openable, as if deleted after listing
    phantoms: BTreeSet<String>,
    fail_list: bool,
    fail_create: bool,
    fail_rename: bool,
    fail_remove: HashSet<String>,
    unreadable: HashSet<String>,
}

/// One remote host's file tree
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    upload_filter: Mutex<Option<UploadFilter>>,
    open_sessions: AtomicUsize,
    connects: AtomicUsize,
}

fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

fn same_dir(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, dir: &str, name: &str, data: Vec<u8>) {
        self.put_at(dir, name, data, SystemTime::now());
    }

    pub fn put_at(&self, dir: &str, name: &str, data: Vec<u8>, modified: SystemTime) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(remote_path(dir, name), (data, modified));
    }

    pub fn mkdir(&self, dir: &str, name: &str) {
        self.state.lock().unwrap().dirs.insert(remote_path(dir, name));
    }

    pub fn put_phantom(&self, dir: &str, name: &str) {
        self.state.lock().unwrap().phantoms.insert(remote_path(dir, name));
    }

    pub fn get(&self, dir: &str, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.files.get(&remote_path(dir, name)).map(|(data, _)| data.clone())
    }

    pub fn exists(&self, dir: &str, name: &str) -> bool {
        self.get(dir, name).is_some()
    }

    /// File names directly inside `dir`
    pub fn names(&self, dir: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .keys()
            .filter_map(|path| {
                let (parent, name) = split(path);
                same_dir(parent, dir).then(|| name.to_string())
            })
            .collect()
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn fail_rename(&self) {
        self.state.lock().unwrap().fail_rename = true;
    }

    pub fn fail_remove(&self, dir: &str, name: &str) {
        self.state.lock().unwrap().fail_remove.insert(remote_path(dir, name));
    }

    /// Uploaded files cannot be opened again
    pub fn make_unreadable(&self, dir: &str, name: &str) {
        self.state.lock().unwrap().unreadable.insert(remote_path(dir, name));
    }

    /// Rewrite every uploaded file before it is stored
    pub fn on_upload(&self, filter: impl Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static) {
        *self.upload_filter.lock().unwrap() = Some(Box::new(filter));
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn commit(&self, path: &str, data: Vec<u8>) {
        let data = match self.upload_filter.lock().unwrap().as_ref() {
            Some(filter) => filter(data),
            None => data,
        };
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (data, SystemTime::now()));
    }
}

struct MemorySession {
    store: Arc<MemoryStore>,
}

impl MemorySession {
    fn open(store: Arc<MemoryStore>) -> Self {
        store.open_sessions.fetch_add(1, Ordering::SeqCst);
        store.connects.fetch_add(1, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.store.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryWriter {
    store: Arc<MemoryStore>,
    path: String,
    buf: Vec<u8>,
    committed: bool,
}

impl Write for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.committed = false;
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.store.commit(&self.path, self.buf.clone());
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.store.commit(&self.path, std::mem::take(&mut self.buf));
        }
    }
}

impl RemoteSession for MemorySession {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.store.state.lock().unwrap();
        if state.fail_list {
            return Err(RemoteError::Protocol {
                path: dir.to_string(),
                message: "permission denied".to_string(),
            });
        }

        let mut entries = Vec::new();
        for (path, (_, modified)) in &state.files {
            let (parent, name) = split(path);
            if same_dir(parent, dir) {
                entries.push(RemoteEntry::file(name, *modified));
            }
        }
        for path in &state.phantoms {
            let (parent, name) = split(path);
            if same_dir(parent, dir) {
                entries.push(RemoteEntry::file(name, SystemTime::now()));
            }
        }
        for path in &state.dirs {
            let (parent, name) = split(path);
            if same_dir(parent, dir) {
                entries.push(RemoteEntry {
                    name: name.to_string(),
                    modified: Some(SystemTime::now()),
                    is_dir: true,
                });
            }
        }
        Ok(entries)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, RemoteError> {
        let state = self.store.state.lock().unwrap();
        if state.unreadable.contains(path) {
            return Err(RemoteError::Protocol {
                path: path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        match state.files.get(path) {
            Some((data, _)) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, RemoteError> {
        if self.store.state.lock().unwrap().fail_create {
            return Err(RemoteError::Protocol {
                path: path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        Ok(Box::new(MemoryWriter {
            store: self.store.clone(),
            path: path.to_string(),
            buf: Vec::new(),
            committed: false,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock().unwrap();
        if state.fail_rename {
            return Err(RemoteError::Protocol {
                path: from.to_string(),
                message: "rename refused".to_string(),
            });
        }
        let file = state
            .files
            .remove(from)
            .ok_or_else(|| RemoteError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), file);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock().unwrap();
        if state.fail_remove.contains(path) {
            return Err(RemoteError::Protocol {
                path: path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }
}

/// Routes endpoints to stores by host name
#[derive(Default)]
pub struct MemoryConnector {
    stores: HashMap<String, Arc<MemoryStore>>,
    refused: Mutex<HashSet<String>>,
}

impl MemoryConnector {
    pub fn new(source: Arc<MemoryStore>, destination: Arc<MemoryStore>) -> Arc<Self> {
        let mut stores = HashMap::new();
        stores.insert(SOURCE_HOST.to_string(), source);
        stores.insert(DESTINATION_HOST.to_string(), destination);
        Arc::new(Self {
            stores,
            refused: Mutex::new(HashSet::new()),
        })
    }

    pub fn refuse(&self, host: &str) {
        self.refused.lock().unwrap().insert(host.to_string());
    }
}

impl RemoteConnector for MemoryConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if self.refused.lock().unwrap().contains(&endpoint.host) {
            return Err(RemoteError::Connect {
                endpoint: endpoint.address(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        let store = self
            .stores
            .get(&endpoint.host)
            .ok_or_else(|| RemoteError::Handshake {
                endpoint: endpoint.address(),
                message: "unknown host".to_string(),
            })?;
        Ok(Box::new(MemorySession::open(store.clone())))
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Success {
        channel: String,
        rows_before: usize,
        rows_after: usize,
    },
    Failure {
        channel: String,
        kind: FailureKind,
    },
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<FailureKind> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Failure { kind, .. } => Some(kind),
                Sent::Success { .. } => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<(usize, usize)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Success {
                    rows_before,
                    rows_after,
                    ..
                } => Some((rows_before, rows_after)),
                Sent::Failure { .. } => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_success(&self, channel: &str, rows_before: usize, rows_after: usize) -> notify::Result<()> {
        self.sent.lock().unwrap().push(Sent::Success {
            channel: channel.to_string(),
            rows_before,
            rows_after,
        });
        Ok(())
    }

    fn notify_failure(&self, channel: &str, kind: FailureKind) -> notify::Result<()> {
        self.sent.lock().unwrap().push(Sent::Failure {
            channel: channel.to_string(),
            kind,
        });
        Ok(())
    }
}

// ============================================================================
// Channel configuration
// ============================================================================

pub const SOURCE_DIR: &str = "/upload";
pub const DESTINATION_DIR: &str = "/inbound";
pub const BACKUP_DIR: &str = "/upload/backup";

fn endpoint(host: &str) -> RemoteEndpoint {
    RemoteEndpoint {
        host: host.to_string(),
        port: 22,
        user: "recon".to_string(),
        password: "secret".to_string(),
    }
}

pub fn channel(name: &str, profile: ChannelProfile) -> ChannelConfig {
    ChannelConfig {
        name: name.to_string(),
        profile,
        source_path: SOURCE_DIR.to_string(),
        destination_path: DESTINATION_DIR.to_string(),
        backup_path: BACKUP_DIR.to_string(),
        interval_secs: 3600,
        retry_iterations: 1,
        retry_delay_secs: 0,
        retention_secs: 3600,
        sweep_interval_secs: 3600,
        source: endpoint(SOURCE_HOST),
        destination: endpoint(DESTINATION_HOST),
    }
}

/// Every file left under a staging root
pub fn staged_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    fn walk(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out);
            } else {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, &mut out);
    out
}

// ============================================================================
// XLSX builder
// ============================================================================

pub mod xlsx {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
    }

    fn column_name(mut index: usize) -> String {
        let mut name = Vec::new();
        loop {
            name.push(b'A' + (index % 26) as u8);
            if index < 26 {
                break;
            }
            index = index / 26 - 1;
        }
        name.reverse();
        String::from_utf8(name).unwrap()
    }

    /// `cellXfs` entry rendering the built-in short date (`mm-dd-yy`)
    pub const SHORT_DATE: u32 = 1;
    /// `cellXfs` entry rendering the custom `dd/mm/yyyy` format
    pub const DMY_DATE: u32 = 2;

    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts><cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/><xf numFmtId="164" applyNumberFormat="1"/></cellXfs></styleSheet>"#;

    fn sheet_xml(rows: &[Vec<&str>], column_styles: &[(usize, u32)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let reference = format!("{}{}", column_name(c), r + 1);
                let style = column_styles
                    .iter()
                    .find(|(column, _)| *column == c && r > 0)
                    .map(|(_, style)| format!(r#" s="{}""#, style))
                    .unwrap_or_default();
                if value.parse::<f64>().is_ok() {
                    xml.push_str(&format!(r#"<c r="{}"{}><v>{}</v></c>"#, reference, style, value));
                } else {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                        reference,
                        escape(value)
                    ));
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    /// Build a workbook from `(sheet name, rows)` pairs, in order
    pub fn workbook(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
        build(sheets, &[], false)
    }

    /// Single sheet whose numeric data cells in the given columns carry a
    /// date style; the cells hold serial numbers, as spreadsheets store dates
    pub fn dated(name: &str, rows: Vec<Vec<&str>>, column_styles: &[(usize, u32)]) -> Vec<u8> {
        build(&[(name, rows)], column_styles, true)
    }

    fn build(sheets: &[(&str, Vec<Vec<&str>>)], column_styles: &[(usize, u32)], styled: bool) -> Vec<u8> {
        let mut rels = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        let mut book = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
        );
        for (i, (name, _)) in sheets.iter().enumerate() {
            rels.push_str(&format!(
                r#"<Relationship Id="rId{0}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{0}.xml"/>"#,
                i + 1
            ));
            book.push_str(&format!(
                r#"<sheet name="{}" sheetId="{1}" r:id="rId{1}"/>"#,
                escape(name),
                i + 1
            ));
        }
        rels.push_str("</Relationships>");
        book.push_str("</sheets></workbook>");

        let options = SimpleFileOptions::default();
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        writer.write_all(rels.as_bytes()).unwrap();
        writer.start_file("xl/workbook.xml", options).unwrap();
        writer.write_all(book.as_bytes()).unwrap();
        if styled {
            writer.start_file("xl/styles.xml", options).unwrap();
            writer.write_all(STYLES.as_bytes()).unwrap();
        }
        for (i, (_, rows)) in sheets.iter().enumerate() {
            writer
                .start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
                .unwrap();
            writer.write_all(sheet_xml(rows, column_styles).as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Single-sheet workbook
    pub fn single(name: &str, rows: Vec<Vec<&str>>) -> Vec<u8> {
        workbook(&[(name, rows)])
    }
}
