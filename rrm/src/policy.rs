//! Slice Policy Document
//!
//! The scheduling policy pushed to the controller for one base station:
//!
//! ```yaml
//! mac:
//!   - dl_scheduler:
//!       parameters:
//!         n_active_slices: 2
//!         slice_percentage: [0.69, 0.31, 0, 0]
//!         slice_maxmcs: [28, 28, 28, 28]
//!   - ul_scheduler:
//!       parameters:
//!         n_active_slices: 2
//!         slice_percentage: [0.55, 0.45, 0, 0]
//!         slice_maxmcs: [16, 16, 16, 16]
//! ```
//!
//! Every mutation is validated; a rejected one leaves the document as it
//! was.

use crate::slicing::{CellAllocation, SliceMcsCaps};
use crate::RrmError;
use common::types::{Direction, Mcs, SliceCount, SliceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// On-disk format of a policy document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyFormat {
    #[default]
    Yaml,
    Json,
}

impl PolicyFormat {
    /// File extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            PolicyFormat::Yaml => "yaml",
            PolicyFormat::Json => "json",
        }
    }

    /// Guess the format from a file name; anything but `.json` is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => PolicyFormat::Json,
            _ => PolicyFormat::Yaml,
        }
    }
}

impl fmt::Display for PolicyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for PolicyFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(PolicyFormat::Yaml),
            "json" => Ok(PolicyFormat::Json),
            other => Err(format!("Unsupported policy format: {}", other)),
        }
    }
}

/// Slice parameters of one scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerParameters {
    pub n_active_slices: SliceCount,
    /// RB share per slice id
    #[serde(default)]
    pub slice_percentage: Vec<f64>,
    /// MCS cap per slice id
    #[serde(default)]
    pub slice_maxmcs: Vec<Mcs>,
}

/// One scheduler section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerPolicy {
    /// Scheduler callback name on the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<String>,
    pub parameters: SchedulerParameters,
}

/// Entry of the `mac` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_scheduler: Option<SchedulerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ul_scheduler: Option<SchedulerPolicy>,
}

/// Policy document for one base station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub mac: Vec<MacPolicy>,
}

impl Default for PolicyDocument {
    /// One active slice per direction owning the whole cell
    fn default() -> Self {
        let scheduler = |max_mcs: Mcs| SchedulerPolicy {
            behaviour: None,
            parameters: SchedulerParameters {
                n_active_slices: SliceCount::new(1).unwrap_or_default(),
                slice_percentage: vec![1.0, 0.4, 0.0, 0.0],
                slice_maxmcs: vec![max_mcs; 4],
            },
        };

        Self {
            mac: vec![
                MacPolicy {
                    dl_scheduler: Some(scheduler(mcs_ceiling(Direction::Dl))),
                    ul_scheduler: None,
                },
                MacPolicy {
                    dl_scheduler: None,
                    ul_scheduler: Some(scheduler(mcs_ceiling(Direction::Ul))),
                },
            ],
        }
    }
}

/// Highest MCS a policy may carry for a direction
pub fn mcs_ceiling(dir: Direction) -> Mcs {
    match dir {
        Direction::Dl => Mcs::QAM64_CEILING,
        Direction::Ul => Mcs::QAM16_CEILING,
    }
}

fn check_share(share: f64) -> Result<(), RrmError> {
    if (0.0..=1.0).contains(&share) {
        Ok(())
    } else {
        Err(RrmError::InvalidShare(share))
    }
}

impl PolicyDocument {
    /// Parse a document, validating every share
    pub fn parse(contents: &str, format: PolicyFormat) -> Result<Self, RrmError> {
        let doc: PolicyDocument = match format {
            PolicyFormat::Yaml => serde_yaml::from_str(contents)?,
            PolicyFormat::Json => serde_json::from_str(contents)?,
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Load a document, choosing the format from the file extension
    pub fn load(path: &Path) -> Result<Self, RrmError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RrmError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;

        let doc = Self::parse(&contents, PolicyFormat::from_path(path))?;
        info!("Loaded policy template {}", path.display());
        Ok(doc)
    }

    /// Check every share lies in [0, 1]
    pub fn validate(&self) -> Result<(), RrmError> {
        self.mac
            .iter()
            .flat_map(|entry| [&entry.dl_scheduler, &entry.ul_scheduler])
            .flatten()
            .flat_map(|scheduler| scheduler.parameters.slice_percentage.iter())
            .try_for_each(|&share| check_share(share))
    }

    /// Serialize the document
    pub fn dump(&self, format: PolicyFormat) -> Result<String, RrmError> {
        Ok(match format {
            PolicyFormat::Yaml => serde_yaml::to_string(self)?,
            PolicyFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Write the document as `{dir}/{basename}_{sequence}.{ext}`
    ///
    /// Fails if the file already exists.
    pub fn save(
        &self,
        dir: &Path,
        basename: &str,
        sequence: u32,
        format: PolicyFormat,
    ) -> Result<PathBuf, RrmError> {
        let path = dir.join(format!("{}_{}.{}", basename, sequence, format.extension()));
        let contents = self.dump(format)?;

        let persistence = |source| RrmError::Persistence {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(persistence)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(persistence)?;
        file.write_all(contents.as_bytes()).map_err(persistence)?;

        debug!("Policy written to {}", path.display());
        Ok(path)
    }

    fn scheduler(&self, dir: Direction) -> Result<&SchedulerParameters, RrmError> {
        self.mac
            .iter()
            .find_map(|entry| match dir {
                Direction::Dl => entry.dl_scheduler.as_ref(),
                Direction::Ul => entry.ul_scheduler.as_ref(),
            })
            .map(|scheduler| &scheduler.parameters)
            .ok_or(RrmError::MissingScheduler(dir))
    }

    fn scheduler_mut(&mut self, dir: Direction) -> Result<&mut SchedulerParameters, RrmError> {
        self.mac
            .iter_mut()
            .find_map(|entry| match dir {
                Direction::Dl => entry.dl_scheduler.as_mut(),
                Direction::Ul => entry.ul_scheduler.as_mut(),
            })
            .map(|scheduler| &mut scheduler.parameters)
            .ok_or(RrmError::MissingScheduler(dir))
    }

    /// Number of active slices
    pub fn num_slices(&self, dir: Direction) -> Result<SliceCount, RrmError> {
        Ok(self.scheduler(dir)?.n_active_slices)
    }

    /// Set the number of active slices
    pub fn set_num_slices(&mut self, dir: Direction, n: SliceCount) -> Result<(), RrmError> {
        let params = self.scheduler_mut(dir)?;
        debug!("Setting the number of {} slices from {} to {}", dir, params.n_active_slices.value(), n.value());
        params.n_active_slices = n;
        Ok(())
    }

    /// RB share of a slice; slices without an entry own nothing
    pub fn slice_rb(&self, slice: SliceId, dir: Direction) -> Result<f64, RrmError> {
        Ok(self
            .scheduler(dir)?
            .slice_percentage
            .get(slice.index())
            .copied()
            .unwrap_or(0.0))
    }

    /// Set the RB share of a slice
    pub fn set_slice_rb(&mut self, slice: SliceId, share: f64, dir: Direction) -> Result<(), RrmError> {
        check_share(share)?;

        let params = self.scheduler_mut(dir)?;
        if params.slice_percentage.len() <= slice.index() {
            params.slice_percentage.resize(slice.index() + 1, 0.0);
        }

        let entry = &mut params.slice_percentage[slice.index()];
        debug!("Setting {} slice {} RB from {} to {}", dir, slice, entry, share);
        *entry = share;
        Ok(())
    }

    /// MCS cap of a slice; slices without an entry get the direction ceiling
    pub fn slice_max_mcs(&self, slice: SliceId, dir: Direction) -> Result<Mcs, RrmError> {
        Ok(self
            .scheduler(dir)?
            .slice_maxmcs
            .get(slice.index())
            .copied()
            .unwrap_or_else(|| mcs_ceiling(dir)))
    }

    /// Set the MCS cap of a slice, clamped to the direction ceiling
    pub fn set_slice_max_mcs(&mut self, slice: SliceId, mcs: Mcs, dir: Direction) -> Result<(), RrmError> {
        let ceiling = mcs_ceiling(dir);
        let mcs = mcs.min(ceiling);

        let params = self.scheduler_mut(dir)?;
        if params.slice_maxmcs.len() <= slice.index() {
            params.slice_maxmcs.resize(slice.index() + 1, ceiling);
        }

        let entry = &mut params.slice_maxmcs[slice.index()];
        debug!("Setting {} slice {} MCS from {} to {}", dir, slice, entry, mcs);
        *entry = mcs;
        Ok(())
    }

    /// Configured MCS caps of every slice slot
    pub fn mcs_caps(&self) -> Result<SliceMcsCaps, RrmError> {
        let mut caps = SliceMcsCaps::default();
        for dir in Direction::ALL {
            for slice in (0..=SliceId::MAX).filter_map(SliceId::new) {
                caps.set_cap(slice, dir, self.slice_max_mcs(slice, dir)?);
            }
        }
        Ok(caps)
    }

    /// Candidate document carrying an allocation
    ///
    /// `self` is left untouched; the first rejected mutation abandons the
    /// candidate.
    pub fn apply_allocation(&self, allocation: &CellAllocation) -> Result<PolicyDocument, RrmError> {
        let mut candidate = self.clone();

        for dir in Direction::ALL {
            candidate.set_num_slices(dir, allocation.num_slices)?;
            for slice in &allocation.slices {
                candidate.set_slice_rb(slice.slice, slice.share(dir), dir)?;
                candidate.set_slice_max_mcs(slice.slice, slice.max_mcs(dir), dir)?;
            }
        }

        Ok(candidate)
    }
}
