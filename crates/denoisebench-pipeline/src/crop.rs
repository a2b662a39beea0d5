//! Anchored crop windows applied uniformly to every image of a dataset.
//!
//! An [`Anchor`] is a bitmask over the six edges/centers. Anchors
//! combine with `|`; [`Anchor::CENTER`] is `VCENTER | HCENTER`. When
//! several flags are set on one axis, center beats the far edge, which
//! beats the near edge. An anchor with no flag for an axis places the
//! window at offset 0 on that axis.

use std::fmt;
use std::ops::BitOr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::{BenchError, Dimensions};

/// Bitmask describing where a crop window sits inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Anchor(u8);

impl Anchor {
    pub const TOP: Self = Self(1);
    pub const BOTTOM: Self = Self(2);
    pub const LEFT: Self = Self(4);
    pub const RIGHT: Self = Self(8);
    pub const VCENTER: Self = Self(16);
    pub const HCENTER: Self = Self(32);
    pub const CENTER: Self = Self(Self::VCENTER.0 | Self::HCENTER.0);

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Offset of a window of length `window` inside an image axis of
    /// length `extent`, given the (far, center) flags of that axis. The
    /// near edge (TOP, LEFT) is offset 0, same as no flag.
    const fn axis_offset(self, far: Self, center: Self, extent: u32, window: u32) -> u32 {
        let slack = extent.saturating_sub(window);
        if self.contains(center) {
            slack / 2
        } else if self.contains(far) {
            slack
        } else {
            0
        }
    }
}

impl BitOr for Anchor {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A fixed-size, anchored rectangular crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    /// Crop width in pixels.
    pub width: u32,
    /// Crop height in pixels.
    pub height: u32,
    /// Placement of the window inside each image.
    pub anchor: Anchor,
}

impl CropWindow {
    /// Create a crop window.
    #[must_use]
    pub const fn new(width: u32, height: u32, anchor: Anchor) -> Self {
        Self {
            width,
            height,
            anchor,
        }
    }

    /// Size of the window.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Top-left corner of the window inside an image of the given size.
    #[must_use]
    pub const fn offsets(&self, image: Dimensions) -> (u32, u32) {
        let x = self.anchor.axis_offset(
            Anchor::RIGHT,
            Anchor::HCENTER,
            image.width,
            self.width,
        );
        let y = self.anchor.axis_offset(
            Anchor::BOTTOM,
            Anchor::VCENTER,
            image.height,
            self.height,
        );
        (x, y)
    }

    /// Slice the window out of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::CropOutOfBounds`] if the window is larger
    /// than the image on either axis.
    pub fn apply(&self, image: &RgbImage) -> Result<RgbImage, BenchError> {
        let size = Dimensions::of(image);
        if self.width > size.width || self.height > size.height {
            return Err(BenchError::CropOutOfBounds {
                window: self.dimensions(),
                image: size,
            });
        }
        let (x, y) = self.offsets(size);
        Ok(image::imageops::crop_imm(image, x, y, self.width, self.height).to_image())
    }
}

impl fmt::Display for CropWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
