//! Filesystem storage backend.
//!
//! Contributes per-scope directory roots (platform defaults, builder-supplied
//! extras, test-mode directories), reads configuration files through the
//! registered formats, aggregates `<name>.d/` fragment directories, filters
//! ghost files, creates new layers on demand, and answers change probes via
//! the file watcher.

use super::{ConfigDiscoveryInfo, ConfigStorage, is_ghost_file};
use super::watcher::FileChangeWatcher;
use crate::error::{ConfigError, ConfigResult};
use crate::format::{ConfigFormat, EntryTree};
use crate::layer::{ConfigLayer, FileLayer};
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::Scope;
use crate::search::SearchList;
use crate::settings::{ConfigFeature, FactorySettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const FILE_STORAGE_ID: &str = "files";

pub struct FileStorage {
    /// Formats in read-priority order; the first is the write format.
    formats: Vec<Arc<dyn ConfigFormat>>,
    write_comments: bool,
    watcher: FileChangeWatcher,
}

impl FileStorage {
    pub fn new(formats: Vec<Arc<dyn ConfigFormat>>, write_comments: bool) -> Self {
        Self {
            formats,
            write_comments,
            watcher: FileChangeWatcher::new(),
        }
    }

    fn write_format(&self) -> Option<&Arc<dyn ConfigFormat>> {
        self.formats.first()
    }

    /// `<company>/<application>[/<sub-path>]` below a base directory.
    fn identity_path(base: &Path, settings: &FactorySettings) -> PathBuf {
        let mut path = base.to_path_buf();
        let company = settings.text_of(ConfigFeature::CompanyName);
        let application = settings.text_of(ConfigFeature::ApplicationName);
        let sub = settings.text_of(ConfigFeature::SubPath);
        if !company.is_empty() {
            path.push(company);
        }
        if !application.is_empty() {
            path.push(application);
        }
        if !sub.is_empty() {
            path.push(sub);
        }
        path
    }

    fn push_location(list: &mut SearchList, scope: Scope, dir: PathBuf) {
        let location = ConfigLocation::new(scope, FILE_STORAGE_ID, true).with_handle(dir);
        list.insert_at_scope_end(location);
    }

    /// Parse one file into a layer, or None when unreadable/unparseable.
    /// I/O and parse problems are logged and skipped; a broken file must not
    /// abort resolution of the whole configuration.
    fn try_read_file(
        &self,
        path: &Path,
        location: &ConfigLocation,
        format: &Arc<dyn ConfigFormat>,
    ) -> Option<Arc<dyn ConfigLayer>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("skipping unreadable {}: {}", path.display(), e);
                }
                return None;
            }
        };
        let tree = match format.parse(&bytes) {
            Ok(tree) => tree,
            Err(e) => {
                warn!("skipping unparseable {}: {}", path.display(), e);
                return None;
            }
        };
        let writeable = location.is_writeable() && !is_read_only(path);
        let source = location
            .derive(path)
            .with_format(format.id());
        self.watcher.record(path);
        if let Some(dir) = path.parent() {
            self.watcher.watch_dir(dir);
        }
        Some(Arc::new(FileLayer::new(
            location.scope(),
            source,
            path.to_path_buf(),
            format.clone(),
            writeable,
            self.write_comments,
            tree,
        )))
    }

    /// Fragments of `<dir>/<name>.d/`, lexicographically ordered so later
    /// names land later in the layer list and override earlier ones.
    fn read_fragments(
        &self,
        name: &str,
        dir: &Path,
        location: &ConfigLocation,
    ) -> Vec<Arc<dyn ConfigLayer>> {
        let fragment_dir = dir.join(format!("{}.d", name));
        if !fragment_dir.is_dir() {
            return Vec::new();
        }
        let mut fragment_files: Vec<PathBuf> = match std::fs::read_dir(&fragment_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect(),
            Err(e) => {
                warn!("cannot list {}: {}", fragment_dir.display(), e);
                return Vec::new();
            }
        };
        fragment_files.sort();

        let mut layers = Vec::new();
        for path in fragment_files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_ghost_file(file_name) {
                continue;
            }
            if let Some(format) = self.format_for(file_name) {
                if let Some(layer) = self.try_read_file(&path, location, &format) {
                    layers.push(layer);
                }
            }
        }
        self.watcher.watch_dir(&fragment_dir);
        layers
    }

    fn format_for(&self, file_name: &str) -> Option<Arc<dyn ConfigFormat>> {
        self.formats
            .iter()
            .find(|f| f.extensions().iter().any(|ext| file_name.ends_with(ext)))
            .cloned()
    }
}

fn is_read_only(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false)
}

impl ConfigStorage for FileStorage {
    fn id(&self) -> &'static str {
        FILE_STORAGE_ID
    }

    fn self_test(&self, _settings: &FactorySettings) -> bool {
        !self.formats.is_empty()
    }

    fn is_generally_writeable(&self) -> bool {
        self.write_format().is_some()
    }

    fn contribute_locations(&self, settings: &FactorySettings, list: &mut SearchList) {
        // Test mode replaces every regular root: nothing outside the test
        // directories may leak into a test run.
        if settings.test_mode_active() {
            for parsed in
                settings.scoped_directories(ConfigFeature::TestmodeDirectories, Scope::User)
            {
                match parsed {
                    Ok((scope, dir)) => Self::push_location(list, scope, dir),
                    Err(e) => warn!("ignoring test-mode directory entry: {}", e),
                }
            }
            return;
        }

        if !settings.bool_of(ConfigFeature::NoDefaultDirectories) {
            #[cfg(unix)]
            Self::push_location(
                list,
                Scope::Host,
                Self::identity_path(Path::new("/etc"), settings),
            );

            if let Ok(cwd) = std::env::current_dir() {
                Self::push_location(list, Scope::Application, cwd.join(".config"));
            }

            if let Some(user_base) = dirs::config_dir() {
                Self::push_location(
                    list,
                    Scope::User,
                    Self::identity_path(&user_base, settings),
                );
            }
        }

        // Builder-supplied extras come after the defaults, so they override
        // them; successive entries override their predecessors.
        for parsed in
            settings.scoped_directories(ConfigFeature::AdditionalUserDirectories, Scope::User)
        {
            match parsed {
                Ok((scope, dir)) => Self::push_location(list, scope, dir),
                Err(e) => warn!("ignoring additional directory entry: {}", e),
            }
        }
        for parsed in settings
            .scoped_directories(ConfigFeature::AdditionalRuntimeDirectories, Scope::Runtime)
        {
            match parsed {
                Ok((scope, dir)) => Self::push_location(list, scope, dir),
                Err(e) => warn!("ignoring additional directory entry: {}", e),
            }
        }
    }

    fn read_layers(&self, name: &str, location: &ConfigLocation) -> Vec<Arc<dyn ConfigLayer>> {
        let Some(dir) = location.handle() else {
            return Vec::new();
        };
        let mut layers: Vec<Arc<dyn ConfigLayer>> = Vec::new();

        // Main files first (lowest priority within this location).
        for format in &self.formats {
            for extension in format.extensions() {
                let path = dir.join(format!("{}{}", name, extension));
                if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                    if is_ghost_file(file_name) {
                        continue;
                    }
                }
                if path.is_file() {
                    if let Some(layer) = self.try_read_file(&path, location, format) {
                        layers.push(layer);
                    }
                }
            }
        }

        // Fragments afterwards, so they override the base file.
        layers.extend(self.read_fragments(name, dir, location));
        layers
    }

    fn create_layer(
        &self,
        name: &str,
        location: &ConfigLocation,
        _scheme: &ConfigScheme,
    ) -> ConfigResult<Arc<dyn ConfigLayer>> {
        let dir = location.handle().ok_or_else(|| {
            ConfigError::not_writeable("file location without directory handle")
        })?;
        let format = self
            .write_format()
            .ok_or_else(|| ConfigError::not_writeable("no write format registered"))?;
        let extension = format
            .extensions()
            .first()
            .ok_or_else(|| ConfigError::logic("format without filename extension"))?;

        std::fs::create_dir_all(dir).map_err(|e| {
            ConfigError::not_writeable(format!("cannot create {}: {}", dir.display(), e))
                .with_location(location.location_string())
        })?;

        let path = dir.join(format!("{}{}", name, extension));
        let empty = format.serialize(&EntryTree::new())?;
        std::fs::write(&path, empty).map_err(|e| {
            ConfigError::not_writeable(format!("cannot create {}: {}", path.display(), e))
                .with_location(location.location_string())
        })?;
        debug!("created configuration file {}", path.display());

        self.watcher.record(&path);
        self.watcher.watch_dir(dir);
        let source = location.derive(&path).with_format(format.id());
        Ok(Arc::new(FileLayer::new(
            location.scope(),
            source,
            path,
            format.clone(),
            true,
            self.write_comments,
            EntryTree::new(),
        )))
    }

    fn has_changed(&self, location: &ConfigLocation) -> bool {
        match location.handle() {
            Some(path) => self.watcher.has_changed(path),
            None => false,
        }
    }

    fn list_configurations(&self, location: &ConfigLocation) -> Vec<ConfigDiscoveryInfo> {
        let Some(dir) = location.handle() else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_ghost_file(file_name) {
                continue;
            }
            for format in &self.formats {
                if let Some(extension) = format
                    .extensions()
                    .iter()
                    .find(|ext| file_name.ends_with(*ext))
                {
                    let name = file_name[..file_name.len() - extension.len()].to_string();
                    if name.is_empty() {
                        continue;
                    }
                    found.push(ConfigDiscoveryInfo {
                        name,
                        scope: location.scope(),
                        format_id: format.id().to_string(),
                        writeable: location.is_writeable() && !is_read_only(&path),
                    });
                    break;
                }
            }
        }
        found
    }

    fn read_blob(&self, name: &str, location: &ConfigLocation) -> Option<Vec<u8>> {
        let dir = location.handle()?;
        if is_ghost_file(name) {
            return None;
        }
        let path = dir.join(name);
        if !path.is_file() {
            return None;
        }
        self.watcher.record(&path);
        std::fs::read(&path).ok()
    }

    fn write_blob(
        &self,
        name: &str,
        location: &ConfigLocation,
        bytes: &[u8],
    ) -> ConfigResult<()> {
        let dir = location.handle().ok_or_else(|| {
            ConfigError::not_writeable("file location without directory handle")
        })?;
        std::fs::create_dir_all(dir).map_err(|e| {
            ConfigError::not_writeable(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(name);
        std::fs::write(&path, bytes).map_err(|e| {
            ConfigError::not_writeable(format!("cannot write {}: {}", path.display(), e))
        })
    }
}
