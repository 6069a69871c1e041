//! Target description: everything about the analyzed binary that the
//! chain builder needs but does not discover itself.
//!
//! ```toml
//! arch = "x86"
//! gadgets = "gadgets.txt"
//! argv = ["/bin/sh"]
//!
//! [sections]
//! data = 0x080ec060
//! got = 0x080ebff4
//! got_size = 8
//! gotplt_size = 64
//!
//! [[code]]
//! addr = 0x08048000
//! path = "text.bin"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::emit::Sections;
use crate::error::{Error, Result};
use crate::importsc::Capacity;
use crate::octet::CodeRegion;
use crate::types::Arch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub arch: Arch,

    /// Gadget listing, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gadgets: Option<PathBuf>,

    /// Default argv for the execve mode.
    #[serde(default = "default_argv")]
    pub argv: Vec<String>,

    pub sections: SectionConfig,

    /// Read-only code the import mode may copy bytes from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<CodeConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionConfig {
    pub data: u64,
    pub got: u64,
    #[serde(default)]
    pub got_size: u64,
    #[serde(default)]
    pub gotplt_size: u64,
}

/// One code region, given inline as hex or as a raw dump on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeConfig {
    pub addr: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_argv() -> Vec<String> {
    vec!["/bin/sh".to_string()]
}

fn is_json(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
}

impl TargetConfig {
    /// Load from TOML, or JSON when the extension is `.json`. Relative
    /// paths inside the file are resolved against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read '{}': {}", path.display(), e)))?;
        let mut config = if is_json(path) {
            Self::from_json(&content)?
        } else {
            Self::from_toml(&content)?
        };
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        log::debug!("loaded {} target from '{}'", config.arch, path.display());
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?
        };
        fs::write(path, content)?;
        Ok(())
    }

    /// Starting point written by `ropcombo init`.
    pub fn sample(arch: Arch) -> Self {
        let (data, got) = match arch {
            Arch::X86 => (0x080e_c060, 0x080e_bff4),
            Arch::X86_64 => (0x006c_a080, 0x006c_9ff8),
        };
        Self {
            arch,
            gadgets: Some(PathBuf::from("gadgets.txt")),
            argv: default_argv(),
            sections: SectionConfig {
                data,
                got,
                got_size: 0x8,
                gotplt_size: 0x40,
            },
            code: Vec::new(),
        }
    }

    fn rebase(&mut self, dir: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        if let Some(p) = self.gadgets.as_mut() {
            join(p);
        }
        for region in &mut self.code {
            if let Some(p) = region.path.as_mut() {
                join(p);
            }
        }
    }

    pub fn sections(&self) -> Sections {
        Sections {
            data: self.sections.data,
            got: self.sections.got,
        }
    }

    pub fn capacity(&self) -> Capacity {
        Capacity {
            got: self.sections.got_size,
            gotplt: self.sections.gotplt_size,
        }
    }

    /// Decode every code region.
    pub fn code_regions(&self) -> Result<Vec<CodeRegion>> {
        self.code.iter().map(CodeConfig::region).collect()
    }
}

impl CodeConfig {
    pub fn region(&self) -> Result<CodeRegion> {
        let bytes = match (&self.hex, &self.path) {
            (Some(h), None) => {
                let cleaned: String = h.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(&cleaned)
                    .map_err(|e| Error::Config(format!("code region {:#x}: {}", self.addr, e)))?
            }
            (None, Some(p)) => fs::read(p)
                .map_err(|e| Error::Config(format!("read '{}': {}", p.display(), e)))?,
            _ => {
                return Err(Error::Config(format!(
                    "code region {:#x} needs exactly one of `hex` or `path`",
                    self.addr
                )))
            }
        };
        Ok(CodeRegion::new(self.addr, bytes))
    }
}
