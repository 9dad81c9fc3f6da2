//! Style catalog.
//!
//! Maps each expression category to an ordered list of reference artworks.
//! The built-in catalog is embedded at compile time from
//! `contrib/styles.toml`; a replacement file with the same layout can be
//! loaded at startup.

use crate::emotion::Emotion;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../../../contrib/styles.toml");

/// Largest value the style slider can take; slider values are 1-based.
pub const SLIDER_MAX: u32 = 6;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no configuration for emotion: {0}")]
    UnknownEmotion(String),
    #[error("catalog is missing emotion: {0}")]
    MissingEmotion(Emotion),
    #[error("emotion {0} has no styles")]
    EmptyStyles(Emotion),
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One reference artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRef {
    /// Path relative to the asset root.
    pub path: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Styles configured for a single category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionConfig {
    pub styles: Vec<StyleRef>,
}

/// Read-only table from category to its styles.
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    entries: BTreeMap<Emotion, EmotionConfig>,
}

impl StyleCatalog {
    /// Parse the catalog embedded in the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let src = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_toml(&src)?;
        tracing::info!(path = %path.display(), "loaded style catalog");
        Ok(catalog)
    }

    /// Parse and validate catalog TOML.
    ///
    /// Every category must be present exactly once with at least one style;
    /// table names are matched case-insensitively.
    pub fn from_toml(src: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, EmotionConfig> = toml::from_str(src)?;

        let mut entries = BTreeMap::new();
        for (name, config) in raw {
            let emotion =
                Emotion::from_str(&name).map_err(|e| CatalogError::UnknownEmotion(e.0))?;
            if config.styles.is_empty() {
                return Err(CatalogError::EmptyStyles(emotion));
            }
            entries.insert(emotion, config);
        }

        if let Some(missing) = Emotion::ALL.into_iter().find(|e| !entries.contains_key(e)) {
            return Err(CatalogError::MissingEmotion(missing));
        }

        Ok(Self { entries })
    }

    /// Resolve a label to its config, ignoring ASCII case.
    pub fn lookup(&self, label: &str) -> Result<&EmotionConfig, CatalogError> {
        let emotion = Emotion::from_str(label)
            .map_err(|_| CatalogError::UnknownEmotion(label.to_string()))?;
        self.entries
            .get(&emotion)
            .ok_or_else(|| CatalogError::UnknownEmotion(label.to_string()))
    }

    pub fn get(&self, emotion: Emotion) -> Option<&EmotionConfig> {
        self.entries.get(&emotion)
    }

    /// Resolve `label` and pick one of its styles under `policy`.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        label: &str,
        policy: StylePolicy,
        slider: u32,
        rng: &mut R,
    ) -> Result<&StyleRef, CatalogError> {
        let emotion = Emotion::from_str(label)
            .map_err(|_| CatalogError::UnknownEmotion(label.to_string()))?;
        let config = self
            .get(emotion)
            .ok_or_else(|| CatalogError::UnknownEmotion(label.to_string()))?;
        policy
            .pick(&config.styles, slider, rng)
            .ok_or(CatalogError::EmptyStyles(emotion))
    }
}

/// How a style is picked from a category's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StylePolicy {
    /// Uniform pick over the whole list, whatever its length.
    Random,
    /// The user's slider value, clamped into the list.
    Slider,
}

impl FromStr for StylePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(StylePolicy::Random),
            "slider" => Ok(StylePolicy::Slider),
            other => Err(format!("unknown style policy: {other}")),
        }
    }
}

impl StylePolicy {
    /// Pick a style for this policy. `slider` is only consulted by
    /// [`StylePolicy::Slider`].
    pub fn pick<'a, R: Rng + ?Sized>(
        &self,
        styles: &'a [StyleRef],
        slider: u32,
        rng: &mut R,
    ) -> Option<&'a StyleRef> {
        match self {
            StylePolicy::Random => styles.choose(rng),
            StylePolicy::Slider => style_for_slider(slider, styles),
        }
    }
}

/// Map a 1-based slider value onto the list, clamping both ends.
pub fn style_for_slider(slider: u32, styles: &[StyleRef]) -> Option<&StyleRef> {
    let last = styles.len().checked_sub(1)?;
    let index = (slider.saturating_sub(1) as usize).min(last);
    styles.get(index)
}

/// Join a catalog path onto the asset root.
pub fn resolve_style_path(asset_root: &Path, style: &StyleRef) -> PathBuf {
    asset_root.join(&style.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn styles(n: usize) -> Vec<StyleRef> {
        (1..=n)
            .map(|i| StyleRef {
                path: format!("s{i}.jpg"),
                weight: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_builtin_has_every_emotion() {
        let catalog = StyleCatalog::builtin().unwrap();
        for emotion in Emotion::ALL {
            let config = catalog.get(emotion).unwrap();
            assert!(!config.styles.is_empty(), "{emotion} has no styles");
        }
        assert_eq!(catalog.get(Emotion::Happy).unwrap().styles.len(), 6);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let catalog = StyleCatalog::builtin().unwrap();
        let lower = catalog.lookup("happy").unwrap();
        let upper = catalog.lookup("Happy").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.styles[0].path, "happy/happy1.jpg");
    }

    #[test]
    fn test_lookup_unknown_label() {
        let catalog = StyleCatalog::builtin().unwrap();
        match catalog.lookup("confused") {
            Err(CatalogError::UnknownEmotion(label)) => assert_eq!(label, "confused"),
            other => panic!("expected UnknownEmotion, got {other:?}"),
        }
        assert!(catalog.lookup("").is_err());
    }

    #[test]
    fn test_from_toml_rejects_extra_category() {
        let mut src = BUILTIN_CATALOG.to_string();
        src.push_str("\n[confused]\nstyles = [{ path = \"x.jpg\" }]\n");
        assert!(matches!(
            StyleCatalog::from_toml(&src),
            Err(CatalogError::UnknownEmotion(_))
        ));
    }

    #[test]
    fn test_from_toml_rejects_missing_category() {
        let src = "[happy]\nstyles = [{ path = \"h.jpg\" }]\n";
        assert!(matches!(
            StyleCatalog::from_toml(src),
            Err(CatalogError::MissingEmotion(Emotion::Neutral))
        ));
    }

    #[test]
    fn test_from_toml_rejects_empty_styles() {
        let src = BUILTIN_CATALOG.replacen(
            "[sad]\nstyles = [",
            "[sad]\nstyles = [] \nignored = [",
            1,
        );
        assert!(matches!(
            StyleCatalog::from_toml(&src),
            Err(CatalogError::EmptyStyles(Emotion::Sad))
        ));
    }

    #[test]
    fn test_weight_defaults_to_one() {
        let config: EmotionConfig = toml::from_str("styles = [{ path = \"a.jpg\" }]").unwrap();
        assert_eq!(config.styles[0].weight, 1.0);
    }

    #[test]
    fn test_slider_clamps() {
        let list = styles(5);
        assert_eq!(style_for_slider(0, &list).unwrap().path, "s1.jpg");
        assert_eq!(style_for_slider(1, &list).unwrap().path, "s1.jpg");
        assert_eq!(style_for_slider(3, &list).unwrap().path, "s3.jpg");
        assert_eq!(style_for_slider(6, &list).unwrap().path, "s5.jpg");
        assert_eq!(style_for_slider(u32::MAX, &list).unwrap().path, "s5.jpg");
        assert!(style_for_slider(1, &[]).is_none());
    }

    #[test]
    fn test_slider_policy_follows_slider() {
        let list = styles(6);
        let mut rng = StdRng::seed_from_u64(7);
        for value in 1..=6 {
            let picked = StylePolicy::Slider.pick(&list, value, &mut rng).unwrap();
            assert_eq!(picked.path, format!("s{value}.jpg"));
        }
    }

    #[test]
    fn test_random_policy_stays_in_range() {
        let list = styles(5);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let picked = StylePolicy::Random.pick(&list, 1, &mut rng).unwrap();
            assert!(list.contains(picked));
        }
    }

    #[test]
    fn test_random_policy_is_uniform() {
        for len in [5, 6] {
            let list = styles(len);
            let mut rng = StdRng::seed_from_u64(7);
            let mut counts = vec![0usize; len];
            let draws = 6000;
            for _ in 0..draws {
                let picked = StylePolicy::Random.pick(&list, 1, &mut rng).unwrap();
                let index = list.iter().position(|s| s == picked).unwrap();
                counts[index] += 1;
            }
            let expected = draws / len;
            for (i, &count) in counts.iter().enumerate() {
                assert!(
                    count.abs_diff(expected) < expected / 5,
                    "style {i} of {len} drawn {count} times, expected about {expected}"
                );
            }
        }
    }

    #[test]
    fn test_random_policy_empty_list() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(StylePolicy::Random.pick(&[], 1, &mut rng).is_none());
    }

    #[test]
    fn test_choose_resolves_label_then_policy() {
        let catalog = StyleCatalog::builtin().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let style = catalog.choose("Surprised", StylePolicy::Slider, 2, &mut rng).unwrap();
        assert_eq!(style.path, "surprise/surprised2.jpg");
        // slider past the end of a five-style list clamps to the last
        let style = catalog.choose("sad", StylePolicy::Slider, 6, &mut rng).unwrap();
        assert_eq!(style.path, "sadness/sadness5.jpg");
    }

    #[test]
    fn test_choose_unknown_label_aborts() {
        let catalog = StyleCatalog::builtin().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            catalog.choose("confused", StylePolicy::Random, 1, &mut rng),
            Err(CatalogError::UnknownEmotion(_))
        ));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Random".parse::<StylePolicy>(), Ok(StylePolicy::Random));
        assert_eq!("slider".parse::<StylePolicy>(), Ok(StylePolicy::Slider));
        assert!("weighted".parse::<StylePolicy>().is_err());
    }

    #[test]
    fn test_resolve_style_path() {
        let style = StyleRef {
            path: "fear/fear1.jpg".into(),
            weight: 1.0,
        };
        assert_eq!(
            resolve_style_path(Path::new("/srv/styles"), &style),
            PathBuf::from("/srv/styles/fear/fear1.jpg")
        );
    }
}
