//! # Catalog モジュール
//!
//! 脅威・ジャマーの参照カタログを読み込みます。カタログは起動時に一度だけ
//! 読み込まれ、以降は読み取り専用で参照されます。

use crate::models::common::{Frequency, ThreatCategory};
use crate::models::jammer::Emitter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 脅威の参照諸元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSpec {
    pub name: String,
    /// 速度（局所単位/tick）
    pub speed: f64,
    /// 航続距離（km）
    #[serde(default)]
    pub range_km: f64,
    #[serde(default)]
    pub category: ThreatCategory,
    /// 妨害電波源（妨害型のみ）
    #[serde(default)]
    pub emitter: Option<Emitter>,
}

/// ジャマーの参照諸元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JammerSpec {
    pub name: String,
    pub radius_km: f64,
    pub frequency: Frequency,
}

impl JammerSpec {
    pub fn emitter(&self) -> Emitter {
        Emitter {
            radius_km: self.radius_km,
            frequency: self.frequency.clone(),
        }
    }
}

/// 参照カタログ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCatalog {
    #[serde(default)]
    pub threats: Vec<ThreatSpec>,
    #[serde(default)]
    pub jammers: Vec<JammerSpec>,
}

/// カタログ読み込みエラー
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("カタログファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("カタログ検証エラー: {0}")]
    Invalid(String),
}

impl ReferenceCatalog {
    /// YAMLファイルからカタログを読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogError::FileNotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|e| CatalogError::Io(path.to_path_buf(), e))?;
        Self::from_yaml(&contents)
    }

    /// YAML文字列からカタログを読み込み
    pub fn from_yaml(contents: &str) -> Result<Self, CatalogError> {
        let catalog: ReferenceCatalog = serde_yaml::from_str(contents)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// 名前の重複と諸元の妥当性を検証
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut names = HashSet::new();
        for spec in &self.threats {
            if !names.insert(spec.name.as_str()) {
                return Err(CatalogError::Invalid(format!("脅威名が重複しています: {}", spec.name)));
            }
            if spec.speed <= 0.0 {
                return Err(CatalogError::Invalid(format!("{} の速度は正の値が必要です", spec.name)));
            }
            if spec.category == ThreatCategory::Jamming && spec.emitter.is_none() {
                return Err(CatalogError::Invalid(format!("妨害型脅威 {} に電波源がありません", spec.name)));
            }
        }
        let mut names = HashSet::new();
        for spec in &self.jammers {
            if !names.insert(spec.name.as_str()) {
                return Err(CatalogError::Invalid(format!("ジャマー名が重複しています: {}", spec.name)));
            }
            if spec.radius_km <= 0.0 {
                return Err(CatalogError::Invalid(format!("{} の有効半径は正の値が必要です", spec.name)));
            }
        }
        Ok(())
    }

    pub fn threat(&self, name: &str) -> Option<&ThreatSpec> {
        self.threats.iter().find(|s| s.name == name)
    }

    pub fn jammer(&self, name: &str) -> Option<&JammerSpec> {
        self.jammers.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.threats.is_empty() && self.jammers.is_empty()
    }
}
