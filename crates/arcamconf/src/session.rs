//! Session configuration - the values handed to the inference SDK at creation.
//!
//! A `SessionConfig` is immutable once a session has been created from it.
//! Changing any field means destroying the session and creating a new one.

use serde::{Deserialize, Serialize};

/// SDK endpoint credentials. Opaque pass-through strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub auth_key: String,
}

/// Which physical camera the session opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    /// Camera id as the SDK expects it. Some OEMs map ids differently,
    /// but 1 is front and 0 is back on the reference devices.
    pub fn sdk_id(self) -> u32 {
        match self {
            CameraFacing::Front => 1,
            CameraFacing::Back => 0,
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Front => write!(f, "front"),
            CameraFacing::Back => write!(f, "back"),
        }
    }
}

/// Camera capture parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture width in pixels.
    /// Default: 720
    #[serde(default = "CameraConfig::default_width")]
    pub width: u32,

    /// Capture height in pixels.
    /// Default: 1280
    #[serde(default = "CameraConfig::default_height")]
    pub height: u32,

    /// Target frame rate, horizontal orientation.
    /// Default: 30.0
    #[serde(default = "CameraConfig::default_fps")]
    pub fps_horizontal: f32,

    /// Target frame rate, vertical orientation.
    /// Default: 30.0
    #[serde(default = "CameraConfig::default_fps")]
    pub fps_vertical: f32,

    #[serde(default)]
    pub facing: CameraFacing,

    /// Mirror the preview (usual for the front camera).
    /// Default: true
    #[serde(default = "CameraConfig::default_mirror")]
    pub mirror: bool,

    /// Initial zoom factor.
    /// Default: 1.0
    #[serde(default = "CameraConfig::default_zoom")]
    pub zoom: f32,
}

impl CameraConfig {
    fn default_width() -> u32 {
        720
    }

    fn default_height() -> u32 {
        1280
    }

    fn default_fps() -> f32 {
        30.0
    }

    fn default_mirror() -> bool {
        true
    }

    fn default_zoom() -> f32 {
        1.0
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            fps_horizontal: Self::default_fps(),
            fps_vertical: Self::default_fps(),
            facing: CameraFacing::default(),
            mirror: Self::default_mirror(),
            zoom: Self::default_zoom(),
        }
    }
}

/// Inference models the SDK loads for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceFeature {
    FaceHighTracking,
    FaceLowTracking,
    FaceMeshTracking,
    BackgroundSegmentation,
    HairSegmentation,
}

impl std::fmt::Display for InferenceFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InferenceFeature::FaceHighTracking => "face_high_tracking",
            InferenceFeature::FaceLowTracking => "face_low_tracking",
            InferenceFeature::FaceMeshTracking => "face_mesh_tracking",
            InferenceFeature::BackgroundSegmentation => "background_segmentation",
            InferenceFeature::HairSegmentation => "hair_segmentation",
        };
        f.write_str(name)
    }
}

/// Inference feature set passed to the SDK at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Default: `["face_high_tracking"]`
    #[serde(default = "InferenceConfig::default_features")]
    pub features: Vec<InferenceFeature>,
}

impl InferenceConfig {
    fn default_features() -> Vec<InferenceFeature> {
        vec![InferenceFeature::FaceHighTracking]
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            features: Self::default_features(),
        }
    }
}

/// Which OS capabilities a session needs before it may be created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Request microphone access together with the camera.
    /// Both must be granted.
    #[serde(default)]
    pub require_microphone: bool,
}

/// Everything needed to create one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub capabilities: CapabilityConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

impl SessionConfig {
    /// Names of fields that are absent.
    ///
    /// Values are pass-through; the only check is present/absent. Empty
    /// credential strings and zero dimensions count as absent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let creds = [
            ("credentials.api_url", &self.credentials.api_url),
            ("credentials.api_key", &self.credentials.api_key),
            ("credentials.secret_key", &self.credentials.secret_key),
            ("credentials.auth_key", &self.credentials.auth_key),
        ];
        for (name, value) in creds {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if self.camera.width == 0 {
            missing.push("camera.width");
        }
        if self.camera.height == 0 {
            missing.push("camera.height");
        }
        if self.inference.features.is_empty() {
            missing.push("inference.features");
        }
        missing
    }

    /// True when every field is present.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SessionConfig {
        SessionConfig {
            credentials: Credentials {
                api_url: "https://sdk.example".to_string(),
                api_key: "key".to_string(),
                secret_key: "secret".to_string(),
                auth_key: "auth".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_camera_defaults_match_shipping_values() {
        let camera = CameraConfig::default();
        assert_eq!((camera.width, camera.height), (720, 1280));
        assert_eq!(camera.fps_horizontal, 30.0);
        assert_eq!(camera.fps_vertical, 30.0);
        assert_eq!(camera.facing, CameraFacing::Front);
        assert!(camera.mirror);
        assert_eq!(camera.zoom, 1.0);
    }

    #[test]
    fn test_facing_sdk_ids() {
        assert_eq!(CameraFacing::Front.sdk_id(), 1);
        assert_eq!(CameraFacing::Back.sdk_id(), 0);
    }

    #[test]
    fn test_default_config_reports_missing_credentials() {
        let missing = SessionConfig::default().missing_fields();
        assert_eq!(missing.len(), 4);
        assert!(missing.contains(&"credentials.api_key"));
    }

    #[test]
    fn test_complete_config() {
        assert!(complete().is_complete());
    }

    #[test]
    fn test_zero_dimension_is_absent() {
        let mut config = complete();
        config.camera.height = 0;
        assert_eq!(config.missing_fields(), vec!["camera.height"]);
    }

    #[test]
    fn test_inference_defaults_to_face_high_tracking() {
        assert_eq!(
            SessionConfig::default().inference.features,
            vec![InferenceFeature::FaceHighTracking]
        );
    }

    #[test]
    fn test_empty_feature_set_is_absent() {
        let mut config = complete();
        config.inference.features.clear();
        assert_eq!(config.missing_fields(), vec!["inference.features"]);
    }

    #[test]
    fn test_whitespace_credential_is_absent() {
        let mut config = complete();
        config.credentials.secret_key = "   ".to_string();
        assert_eq!(config.missing_fields(), vec!["credentials.secret_key"]);
    }
}
