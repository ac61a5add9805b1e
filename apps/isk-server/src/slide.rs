//! Slide variants.
//!
//! Every variant implements [`SlideVariant`]; [`SlideContent`] carries the
//! variant tag and dispatches to it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{SyncError, SyncResult};
use isk_proto::{GroupId, SlideId};

pub trait SlideVariant {
    const TYPE: &'static str;

    /// Variant specific part of the payload handed to displays and UIs.
    fn render_payload(&self) -> serde_json::Value;

    /// Content for a copy of the slide.
    fn clone_content(&self) -> Self;

    /// Whether the asset collaborator has to produce content before the
    /// slide can be shown.
    fn needs_fetch(&self) -> bool {
        false
    }

    fn validate(&self) -> SyncResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSlide {
    pub filename: String,
}

impl SlideVariant for ImageSlide {
    const TYPE: &'static str = "image";

    fn render_payload(&self) -> serde_json::Value {
        json!({ "filename": self.filename })
    }

    fn clone_content(&self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvgSlide {
    pub svg: String,
}

impl SlideVariant for SvgSlide {
    const TYPE: &'static str = "svg";

    fn render_payload(&self) -> serde_json::Value {
        json!({ "is_svg": true })
    }

    fn clone_content(&self) -> Self {
        self.clone()
    }
}

/// Content fetched over http(s) by the asset collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSlide {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for HttpSlide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSlide")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SlideVariant for HttpSlide {
    const TYPE: &'static str = "http";

    fn render_payload(&self) -> serde_json::Value {
        // credentials stay on the server
        json!({ "url": self.url })
    }

    fn clone_content(&self) -> Self {
        self.clone()
    }

    fn needs_fetch(&self) -> bool {
        true
    }

    fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(self.url.trim())
            .map_err(|_| SyncError::Validation("URL is invalid.".into()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Validation(
                "URL scheme is invalid, must be http or https.".into(),
            ));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(SyncError::Validation("URL is invalid, missing host.".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeSlide {
    pub award: String,
    pub winners: Vec<String>,
}

impl SlideVariant for PrizeSlide {
    const TYPE: &'static str = "prize";

    fn render_payload(&self) -> serde_json::Value {
        json!({ "award": self.award, "winners": self.winners })
    }

    fn clone_content(&self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlideContent {
    Image(ImageSlide),
    Svg(SvgSlide),
    Http(HttpSlide),
    Prize(PrizeSlide),
}

macro_rules! dispatch {
    ($content:expr, $slide:ident => $body:expr) => {
        match $content {
            SlideContent::Image($slide) => $body,
            SlideContent::Svg($slide) => $body,
            SlideContent::Http($slide) => $body,
            SlideContent::Prize($slide) => $body,
        }
    };
}

impl SlideContent {
    pub fn type_str(&self) -> &'static str {
        match self {
            SlideContent::Image(_) => ImageSlide::TYPE,
            SlideContent::Svg(_) => SvgSlide::TYPE,
            SlideContent::Http(_) => HttpSlide::TYPE,
            SlideContent::Prize(_) => PrizeSlide::TYPE,
        }
    }

    pub fn render_payload(&self) -> serde_json::Value {
        dispatch!(self, slide => slide.render_payload())
    }

    pub fn needs_fetch(&self) -> bool {
        dispatch!(self, slide => slide.needs_fetch())
    }

    pub fn validate(&self) -> SyncResult<()> {
        dispatch!(self, slide => slide.validate())
    }

    pub fn clone_content(&self) -> Self {
        match self {
            SlideContent::Image(slide) => SlideContent::Image(slide.clone_content()),
            SlideContent::Svg(slide) => SlideContent::Svg(slide.clone_content()),
            SlideContent::Http(slide) => SlideContent::Http(slide.clone_content()),
            SlideContent::Prize(slide) => SlideContent::Prize(slide.clone_content()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub id: SlideId,
    pub name: String,
    pub group_id: GroupId,
    /// Set by the asset collaborator once renditions exist.
    pub ready: bool,
    pub public: bool,
    pub content: SlideContent,
}

impl Slide {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Payload sent to clients: common fields merged with the variant's own.
    pub fn render_payload(&self) -> serde_json::Value {
        let mut payload = json!({
            "id": self.id,
            "name": self.name,
            "group_id": self.group_id,
            "type": self.content.type_str(),
            "ready": self.ready,
            "public": self.public,
        });
        if let (Some(map), serde_json::Value::Object(extra)) =
            (payload.as_object_mut(), self.content.render_payload())
        {
            map.extend(extra);
        }
        payload
    }
}
