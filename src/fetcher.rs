use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};
use ureq::Agent;
use url::Url;

use crate::errors::Error;
use crate::settings::{CacheSettings, Settings};
use crate::utils::new_spinner;

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(4);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Downloads inventory, metadata, and dataset files from the dissemination
/// API, keeping a filesystem cache keyed by stable resource names.
pub struct Fetcher {
    agent: Agent,
    base_url: Url,
    sdmx_api_version: String,
    sdmx_agency_id: String,
    cache: CacheSettings,
}

/// Classifies a failed download attempt for the backoff loop.
enum Failure {
    Retry(Error),
    Fatal(Error),
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Fetcher, Error> {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(60)))
            .user_agent("eurostat-loader/0.1")
            .build()
            .into();

        // the cache directory doubles as the download scratch area, so it
        // has to exist even when cache reads are disabled
        std::fs::create_dir_all(&settings.cache.path)?;

        Ok(Fetcher {
            agent,
            base_url: settings.eurostat.base_url.clone(),
            sdmx_api_version: settings.eurostat.sdmx_api_version.clone(),
            sdmx_agency_id: settings.eurostat.sdmx_agency_id.clone(),
            cache: settings.cache.clone(),
        })
    }

    /// The master data inventory listing every dataset with its last change
    /// timestamp and download URL.
    pub fn get_inventory(&self) -> Result<PathBuf, Error> {
        let url = format!("{}/files/inventory?type=data", self.base());
        self.fetch(&url, "inventory.tsv")
    }

    /// The Data Structure Definition for a dataset, requested through the
    /// dataflow endpoint so the referenced structure comes back inline.
    pub fn get_dsd_xml(&self, dataset_id: &str) -> Result<PathBuf, Error> {
        let url = format!(
            "{}/sdmx/{}/dataflow/{}/{}/latest?references=datastructure",
            self.base(),
            self.sdmx_api_version,
            self.sdmx_agency_id,
            dataset_id.to_uppercase(),
        );
        self.fetch(&url, &format!("dsd_{}.xml", dataset_id.to_lowercase()))
    }

    pub fn get_codelist_xml(&self, codelist_id: &str) -> Result<PathBuf, Error> {
        let url = format!(
            "{}/sdmx/{}/codelist/{}/{}/latest",
            self.base(),
            self.sdmx_api_version,
            self.sdmx_agency_id,
            codelist_id.to_uppercase(),
        );
        self.fetch(&url, &format!("codelist_{}.xml", codelist_id.to_lowercase()))
    }

    /// The compressed TSV for a dataset. The download URL comes from the
    /// inventory; the cache filename is derived from the dataset id so it
    /// stays stable across URL changes.
    pub fn get_dataset_tsv(&self, dataset_id: &str, download_url: &str) -> Result<PathBuf, Error> {
        let url = self
            .base_url
            .join(download_url)
            .map_err(|err| Error::Network(format!("invalid download url {download_url}: {err}")))?;
        self.fetch(url.as_str(), &format!("{}.tsv.gz", dataset_id.to_lowercase()))
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn cache_path(&self, filename: &str) -> PathBuf {
        self.cache.path.join(filename)
    }

    fn fetch(&self, url: &str, cache_filename: &str) -> Result<PathBuf, Error> {
        let cache_path = self.cache_path(cache_filename);

        if self.cache.enabled && cache_path.exists() {
            info!(file = cache_filename, "Found in cache, skipping download");
            return Ok(cache_path);
        }

        self.download_to_cache(url, &cache_path)?;
        Ok(cache_path)
    }

    fn download_to_cache(&self, url: &str, cache_path: &Path) -> Result<(), Error> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_download(url, cache_path) {
                Ok(()) => {
                    info!(url, path = %cache_path.display(), "Download finished");
                    return Ok(());
                }
                Err(Failure::Retry(err)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, delay_secs = delay.as_secs(), error = %err, "Download failed, retrying");
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                }
                Err(Failure::Retry(err)) | Err(Failure::Fatal(err)) => return Err(err),
            }
        }
    }

    fn try_download(&self, url: &str, cache_path: &Path) -> Result<(), Failure> {
        let mut response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(err) => return Err(Failure::Retry(Error::Network(err.to_string()))),
        };

        let status = response.status();
        if !status.is_success() {
            let err = Error::Network(format!("GET {url} returned status {status}"));
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(Failure::Retry(err))
            }
            else {
                Err(Failure::Fatal(err))
            };
        }

        let spinner = new_spinner(&format!("Downloading {url}"));
        spinner.enable_steady_tick(Duration::from_millis(200));

        let result = write_body(&mut response, cache_path);
        spinner.finish_and_clear();

        result.map_err(|err| {
            // never leave a partial file behind for the cache to pick up
            let _ = std::fs::remove_file(cache_path);
            Failure::Retry(Error::Io(err))
        })
    }
}

fn write_body(response: &mut ureq::http::Response<ureq::Body>, path: &Path) -> Result<(), io::Error> {
    let mut file = File::create(path)?;
    let mut reader = response.body_mut().as_reader();
    io::copy(&mut reader, &mut file)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DatabaseSettings, DatabaseType, EurostatSettings, LoggingSettings};

    fn test_settings(cache_dir: &Path) -> Settings {
        Settings {
            db_type: DatabaseType::Sqlite,
            managed_datasets_path: PathBuf::from("managed_datasets.yml"),
            db: DatabaseSettings {
                host: "localhost".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: None,
                name: ":memory:".to_string(),
                use_unlogged_tables: false,
            },
            cache: CacheSettings {
                path: cache_dir.to_path_buf(),
                enabled: true,
            },
            log: LoggingSettings {
                level: "INFO".to_string(),
            },
            eurostat: EurostatSettings {
                base_url: Url::parse("https://ec.europa.eu/eurostat/api/dissemination").unwrap(),
                sdmx_api_version: "2.1".to_string(),
                sdmx_agency_id: "ESTAT".to_string(),
            },
        }
    }

    #[test]
    fn cached_inventory_is_returned_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let fetcher = Fetcher::new(&settings).unwrap();

        std::fs::write(dir.path().join("inventory.tsv"), "Code\tType\n").unwrap();

        let path = fetcher.get_inventory().unwrap();
        assert_eq!(path, dir.path().join("inventory.tsv"));
    }

    #[test]
    fn dataset_cache_filename_derives_from_dataset_id() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let fetcher = Fetcher::new(&settings).unwrap();

        // the cache key ignores the URL entirely
        std::fs::write(dir.path().join("tps00001.tsv.gz"), b"gz").unwrap();

        let path = fetcher
            .get_dataset_tsv("TPS00001", "https://example.com/some/other/name.tsv.gz")
            .unwrap();
        assert_eq!(path, dir.path().join("tps00001.tsv.gz"));
    }

    #[test]
    fn metadata_cache_filenames_are_lowercased() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let fetcher = Fetcher::new(&settings).unwrap();

        std::fs::write(dir.path().join("dsd_tps00001.xml"), "<x/>").unwrap();
        std::fs::write(dir.path().join("codelist_cl_geo.xml"), "<x/>").unwrap();

        assert!(fetcher.get_dsd_xml("TPS00001").is_ok());
        assert!(fetcher.get_codelist_xml("CL_GEO").is_ok());
    }
}
