//! The Natural Image Noise Dataset (NIND).
//!
//! Real photographs shot at several ISO settings on a tripod; the
//! lowest ISO capture is the reference and the highest is the noisy
//! image. Files are cached under the dataset root as
//! `<name>/NIND_<name>_ISO<iso>.<ext>` and fetched from Wikimedia
//! Commons on first use.
//!
//! Reference: <https://arxiv.org/abs/1906.00270>,
//! <https://commons.wikimedia.org/wiki/Natural_Image_Noise_Dataset>

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::dataset::DatasetSource;
use crate::fetch::{Downloader, Fetch};
use crate::types::{BenchError, Triplet};

/// Captures of one camera and bit depth, sharing a file extension.
struct CameraSet {
    extension: &'static str,
    /// `(name, ISO labels)`; labels are ordered from lowest to highest ISO.
    captures: &'static [(&'static str, &'static [&'static str])],
}

const CATALOG: &[CameraSet] = &[
    // Fujifilm X-T1, 8-bit JPEG
    CameraSet {
        extension: "jpg",
        captures: &[
            ("droid", &["200", "800", "3200", "6400"]),
            ("gnome", &["200", "800", "1600", "6400"]),
            ("Ottignies", &["200", "640", "3200", "6400"]),
            ("MuseeL-turtle", &["200", "800", "1250", "6400"]),
            ("MuseeL-centrifuge", &["200", "800", "2000", "6400"]),
            ("MuseeL-shell", &["200", "400", "800", "6400"]),
            ("MuseeL-coral", &["200", "800", "5000", "6400"]),
            ("MuseeL-head", &["200", "640", "3200", "6400"]),
            ("MuseeL-heads", &["200", "400", "3200", "6400"]),
            ("MuseeL-mask", &["200", "640", "4000", "6400"]),
            ("MuseeL-pig", &["200", "500", "2000", "6400"]),
            ("MuseeL-inspiredlotus", &["200", "640", "2500", "6400"]),
            ("MuseeL-pinklotus", &["200", "800", "4000", "6400"]),
            ("MuseeL-Armlessness", &["200", "800", "2000", "6400"]),
            ("MuseeL-byMarcGroessens", &["200", "400", "3200", "6400"]),
            ("MuseeL-Moschophore", &["200", "500", "4000", "6400"]),
            ("MuseeL-AraPacis", &["200", "800", "4000", "6400"]),
            ("MuseeL-stele", &["200", "640", "1000", "6400"]),
            ("MuseeL-cross", &["200", "500", "4000", "6400"]),
            ("MuseeL-fuite", &["200", "320", "4000", "6400"]),
            ("MuseeL-RGB", &["200", "250", "1000", "6400"]),
            ("MuseeL-Vincent", &["200", "400", "2500", "6400"]),
            ("MuseeL-ambon", &["200", "640", "2500", "6400"]),
            ("MuseeL-ram", &["200", "800", "1000", "6400"]),
            ("MuseeL-pedestal", &["200", "1250", "5000", "6400"]),
            ("MuseeL-theatre", &["200", "400", "2500", "6400"]),
            ("MuseeL-text", &["200", "400", "5000", "6400"]),
            ("MuseeL-painting", &["200", "800", "3200", "6400"]),
            ("MuseeL-yombe", &["200", "640", "3200", "6400"]),
            ("MuseeL-hanging", &["200", "500", "4000", "6400"]),
            ("MuseeL-snakeAndMask", &["200", "2000", "6400", "H1"]),
            ("MuseeL-coral2", &["200", "6400", "H1", "H2"]),
            ("MuseeL-Vanillekipferl", &["200", "6400", "H1"]),
            ("MuseeL-clam", &["200", "6400", "H1"]),
            ("MuseeL-Ndengese", &["200", "6400", "H1"]),
            ("MuseeL-Bobo", &["200", "2500", "6400", "H1", "H2"]),
            ("threebicycles", &["200", "6400"]),
            ("sevenbicycles", &["200", "1600", "6400"]),
            ("Stevin", &["200", "4000", "6400"]),
            ("wall", &["200", "640", "6400"]),
            ("Saint-Remi", &["200", "6400", "H1", "H2", "H3"]),
            ("Saint-Remi-C", &["200", "6400", "H1", "H2"]),
            ("books", &["200", "1600", "6400", "H1", "H2"]),
            ("bloop", &["200", "3200", "6400", "H1"]),
            ("schooltop", &["200", "800", "6400", "H1", "H2"]),
            ("Sint-Joris", &["200", "1000", "2500", "6400", "H1", "H2", "H3"]),
            ("claycreature", &["200", "4000", "6400", "H1"]),
            ("claycreatures", &["200", "1600", "5000", "6400", "H1", "H2", "H3"]),
            ("claytools", &["200", "5000", "6400", "H1", "H2", "H3"]),
            ("CourtineDeVillersDebris", &["200", "2500", "6400", "H1", "H2"]),
            ("Leonidas", &["200", "400", "3200", "6400", "H1"]),
            ("pastries", &["200", "3200", "6400", "H1", "H2"]),
            ("mugshot", &["200", "6400", "H1"]),
            ("holywater", &["200", "1600", "4000", "6400", "H1", "H2", "H3"]),
            ("chapel", &["200", "1000", "6400", "H1", "H2", "H3"]),
            ("directions", &["200", "640", "640-2", "1250", "6400", "6400-2", "H1", "H2", "H3"]),
            ("drowning", &["200", "800", "6400", "H1", "H2", "H3"]),
            ("parking-keyboard", &["200", "400", "800", "1600", "3200", "6400", "H1", "H2", "H3"]),
            ("semicircle", &["200", "320", "640", "1250", "2500", "5000", "6400", "H1", "H2", "H3"]),
            ("stairs", &["200", "250", "320", "640", "1250", "2500", "5000", "6400", "H1", "H2"]),
            ("stefantiek", &["200", "250", "500", "2000", "6400", "H1", "H2"]),
            ("tree1", &["200", "400", "1600", "3200", "6400", "H1", "H2", "H3"]),
            ("tree2", &["200", "800", "1600", "3200", "6400", "H1", "H2", "H3"]),
            ("ursulines-building", &["200", "250", "400", "1000", "4000", "6400", "H1"]),
            ("ursulines-can", &["200", "200-2", "400", "800", "1600", "3200", "6400", "H1", "H2"]),
            ("ursulines-red", &["200", "250", "500", "4000", "6400", "H1", "H2"]),
            ("vlc", &["200", "250", "500", "1000", "3200", "6400", "H1", "H2", "H3"]),
            ("whistle", &["200", "250", "500", "1000", "2000", "4000", "6400", "H1", "H2", "H3", "H4"]),
            ("Homarus-americanus", &["200", "200-2", "250", "400", "800", "2000", "3200", "5000", "6400", "H1", "H2"]),
            ("fruits", &["200", "200-2", "800", "3200", "5000", "6400"]),
            ("MVB-Sainte-Anne", &["200", "200-2", "250", "640", "4000", "6400", "H1"]),
            ("MVB-JardinBotanique", &["200", "200-2", "400", "1000", "2500", "3200", "6400"]),
            ("MVB-Urania", &["200", "320", "500", "1000", "2500", "5000", "6400", "H1", "H2"]),
            ("MVB-1887GrandPlace", &["200", "200-2", "400", "640", "2000", "5000", "6400", "H1", "H2"]),
            ("MVB-heraldicLion", &["200", "200-2", "320", "1000", "3200", "6400", "H1", "H2"]),
            ("MVB-LouveFire", &["200", "200-2", "400", "800", "1600", "3200", "6400", "6400-2", "H1", "H2"]),
            ("MVB-Bombardement", &["200", "200-2", "320", "800", "5000", "6400", "H1", "H2", "H3"]),
            ("beads", &["200", "500", "1000", "3200", "6400"]),
            ("shells", &["200", "200-2", "250", "320", "1000", "1600", "2500", "3200", "5000", "6400", "H1", "H2", "H3"]),
        ],
    },
    // Fujifilm X-T1, 16-bit PNG
    CameraSet {
        extension: "png",
        captures: &[
            ("soap", &["200", "200-2", "400", "800", "3200", "6400", "H1", "H2", "H3", "H4"]),
            ("kibbles", &["200", "200-2", "800", "5000", "6400", "H1", "H2", "H3"]),
            ("bertrixtree", &["200", "400", "640", "2500", "4000", "6400", "H1"]),
            ("BruegelLibraryS1", &["200", "400", "1000", "2500", "3200", "5000", "6400", "H1", "H2"]),
            ("BruegelLibraryS2", &["200", "500", "1250", "2500", "5000", "6400", "H1", "H2", "H3", "H4"]),
            ("LaptopInLibrary", &["200", "500", "800", "1600", "2500", "6400", "H1", "H2", "H3"]),
            ("banana", &["200", "250", "500", "800", "1250", "2000", "4000", "6400", "H1", "H2", "H3"]),
            ("dustyrubberduck", &["200", "1000", "1250", "2500", "5000", "6400", "H1", "H2"]),
            ("partiallyeatenbanana", &["200", "640", "1250", "2500", "4000", "5000", "6400", "H1", "H2", "H3"]),
            ("corkboard", &["200", "320", "1000", "2500", "5000", "6400", "H1", "H2", "H3"]),
            ("fireextinguisher", &["200", "200-2", "200-3", "800", "3200", "6400", "H1", "H2", "H3"]),
        ],
    },
    // Canon EOS 500D, 8-bit JPEG
    CameraSet {
        extension: "jpg",
        captures: &[
            ("MuseeL-Bobo-C500D", &["100", "200", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-yombe-C500D", &["100", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-sol-C500D", &["100", "200", "400", "800", "3200", "H1"]),
            ("MuseeL-skull-C500D", &["100", "200", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-Sepik-C500D", &["100", "200", "800", "1600", "3200", "H1"]),
            ("MuseeL-Saint-Pierre-C500D", &["100", "100-2", "200", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-mammal-C500D", &["100", "200", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-idole-C500D", &["100", "100-2", "200", "400", "800", "3200", "H1"]),
            ("MuseeL-CopteArch-C500D", &["100", "100-2", "200", "400", "1600", "3200"]),
            ("MuseeL-cross-C500D", &["100", "200", "400", "800", "1600", "3200", "H1"]),
            ("MuseeL-fuite-C500D", &["100", "200", "400", "800", "1600", "3200", "H1"]),
        ],
    },
    // Other cameras
    CameraSet {
        extension: "jpg",
        captures: &[
            ("Pen-pile", &["100", "200", "400", "800", "1600", "3200"]),
        ],
    },
];

/// Symmetric dataset over the NIND catalog.
#[derive(Debug)]
pub struct NaturalImageNoiseDataset {
    root: PathBuf,
    fetch: WikimediaFetch,
}

impl NaturalImageNoiseDataset {
    /// Registry identifier.
    pub const NAME: &'static str = "natural_images";

    /// Registry description.
    pub const DESCRIPTION: &'static str = "Natural Image Noise Dataset (NIND), real ISO noise";

    /// Dataset cached under `root`. Nothing is read or downloaded until
    /// the dataset is opened.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fetch: WikimediaFetch::default(),
        }
    }

    /// Local cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn capture_path(&self, name: &str, iso: &str, extension: &str) -> PathBuf {
        self.root
            .join(name)
            .join(format!("NIND_{name}_ISO{iso}.{extension}"))
    }
}

impl DatasetSource for NaturalImageNoiseDataset {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn triplets(&self) -> Result<Vec<Triplet>, BenchError> {
        let mut triplets = Vec::new();
        for set in CATALOG {
            for &(name, isos) in set.captures {
                let (Some(lowest), Some(highest)) = (isos.first(), isos.last()) else {
                    continue;
                };
                triplets.push(Triplet::new(
                    name,
                    self.capture_path(name, lowest, set.extension),
                    Some(self.capture_path(name, highest, set.extension)),
                ));
            }
        }
        Ok(triplets)
    }

    fn fetcher(&self) -> &dyn Fetch {
        &self.fetch
    }
}

/// Fetch hook resolving a local file name to its Wikimedia Commons
/// upload and downloading it.
#[derive(Debug, Default)]
pub struct WikimediaFetch {
    downloader: OnceLock<Downloader>,
}

impl WikimediaFetch {
    /// Commons API endpoint.
    pub const API_URL: &'static str = "https://commons.wikimedia.org/w/api.php";

    /// Only revisions uploaded after this instant are considered, which
    /// pins the dataset to its published version.
    pub const REVISION_START: &'static str = "2019-06-11T23:59:59Z";

    fn downloader(&self) -> Result<&Downloader, BenchError> {
        if let Some(downloader) = self.downloader.get() {
            return Ok(downloader);
        }
        let downloader = Downloader::new()?;
        Ok(self.downloader.get_or_init(|| downloader))
    }

    /// Query the API for the upload URL of `file_name`.
    fn resolve_url(&self, file_name: &str, path: &Path) -> Result<String, BenchError> {
        let missing = |reason: String| BenchError::MissingAsset {
            path: path.to_path_buf(),
            reason,
        };
        let title = commons_title(file_name);
        let response: ApiResponse = self
            .downloader()?
            .client()
            .get(Self::API_URL)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("prop", "imageinfo"),
                ("titles", title.as_str()),
                ("iistart", Self::REVISION_START),
                ("iiprop", "timestamp|url|sha1"),
            ])
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::json)
            .map_err(|e| missing(format!("Wikimedia query for {title} failed: {e}")))?;

        first_upload(response).ok_or_else(|| missing(format!("Wikimedia has no upload for {title}")))
    }
}

impl Fetch for WikimediaFetch {
    fn fetch(&self, path: &Path) -> Result<(), BenchError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BenchError::MissingAsset {
                path: path.to_path_buf(),
                reason: "path has no file name".to_string(),
            })?;
        let url = self.resolve_url(&file_name, path)?;
        self.downloader()?.download(&url, path)
    }
}

/// Commons page title of an uploaded file.
fn commons_title(file_name: &str) -> String {
    format!("File:{}", file_name.replace('_', " "))
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    query: ApiQuery,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    pages: BTreeMap<String, ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    imageinfo: Vec<ApiImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiImageInfo {
    url: String,
}

/// URL of the first revision on the first returned page.
fn first_upload(response: ApiResponse) -> Option<String> {
    response
        .query
        .pages
        .into_values()
        .next()?
        .imageinfo
        .into_iter()
        .next()
        .map(|info| info.url)
}
