//! Test helpers and fixtures for syncq-core tests

use chrono::DateTime;

use crate::models::{PlayType, QueueEntry, RoomId, SongRef};

/// Create a test room ID
pub fn test_room_id(id: &str) -> RoomId {
    RoomId(id.to_string())
}

/// Test fixture builder for QueueEntry
pub struct EntryFixture {
    song: String,
    adder: String,
    play_type: PlayType,
    millis: Option<i64>,
    artwork: Option<Vec<u8>>,
}

impl EntryFixture {
    pub fn new(song: &str) -> Self {
        Self {
            song: song.to_string(),
            adder: "tester".to_string(),
            play_type: PlayType::Later,
            millis: None,
            artwork: None,
        }
    }

    pub fn adder(mut self, adder: &str) -> Self {
        self.adder = adder.to_string();
        self
    }

    pub fn play_type(mut self, play_type: PlayType) -> Self {
        self.play_type = play_type;
        self
    }

    pub fn at_millis(mut self, millis: i64) -> Self {
        self.millis = Some(millis);
        self
    }

    pub fn artwork(mut self, bytes: Vec<u8>) -> Self {
        self.artwork = Some(bytes);
        self
    }

    pub fn build(self) -> QueueEntry {
        let mut entry = QueueEntry::new(
            SongRef::from(self.song.as_str()),
            format!("Title of {}", self.song),
            self.play_type,
            self.adder,
        );
        if let Some(ms) = self.millis {
            entry.time_added = DateTime::from_timestamp_millis(ms).unwrap();
        }
        entry.artwork = self.artwork;
        entry
    }
}

/// Encode a solid-color PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([200, 40, 90]),
    ));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
