//! Demuxer over a [`SourceFixture`]

use recast_core::backend::{ContainerError, ContainerResult, Extractor};
use recast_core::media::MediaFormat;

use crate::fixture::{SampleEntry, SourceFixture};

/// Walks the fixture's interleaved sample table, skipping unselected tracks.
pub struct SimExtractor {
    fixture: SourceFixture,
    samples: Vec<SampleEntry>,
    selected: Vec<bool>,
    position: usize,
    released: bool,
}

impl SimExtractor {
    pub fn new(fixture: SourceFixture) -> Self {
        let samples = fixture.samples();
        let selected = vec![false; fixture.tracks.len()];
        Self {
            fixture,
            samples,
            selected,
            position: 0,
            released: false,
        }
    }

    fn current(&self) -> Option<&SampleEntry> {
        if self.released {
            return None;
        }
        self.samples.get(self.position)
    }

    fn skip_unselected(&mut self) {
        while let Some(entry) = self.samples.get(self.position)
            && !self.selected[entry.track]
        {
            self.position += 1;
        }
    }
}

impl Extractor for SimExtractor {
    fn track_count(&self) -> usize {
        self.fixture.tracks.len()
    }

    fn track_format(&self, track: usize) -> ContainerResult<MediaFormat> {
        self.fixture
            .tracks
            .get(track)
            .map(|spec| spec.format.clone())
            .ok_or(ContainerError::InvalidTrack { track })
    }

    fn select_track(&mut self, track: usize) -> ContainerResult<()> {
        let selected = self
            .selected
            .get_mut(track)
            .ok_or(ContainerError::InvalidTrack { track })?;
        *selected = true;
        // Selection restarts the read position like a seek to zero
        self.position = 0;
        self.skip_unselected();
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|entry| entry.track)
    }

    fn sample_size(&self) -> Option<usize> {
        self.current().map(|entry| entry.size)
    }

    fn sample_time_us(&self) -> i64 {
        self.current().map_or(-1, |entry| entry.presentation_time_us)
    }

    fn sample_is_key_frame(&self) -> bool {
        self.current().is_some_and(|entry| entry.key_frame)
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> ContainerResult<usize> {
        let entry = *self.current().ok_or_else(|| ContainerError::InvalidSource {
            reason: "read past the last sample".to_string(),
        })?;
        if entry.size > buffer.len() {
            return Err(ContainerError::SampleTooLarge {
                size: entry.size,
                capacity: buffer.len(),
            });
        }
        buffer[..entry.size].copy_from_slice(&self.fixture.sample_data(&entry));
        Ok(entry.size)
    }

    fn advance(&mut self) -> bool {
        if self.current().is_none() {
            return false;
        }
        self.position += 1;
        self.skip_unselected();
        self.current().is_some()
    }

    fn release(&mut self) {
        self.released = true;
    }
}
