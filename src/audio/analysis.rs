//! Corpus analysis: slide the MFCC extractor across a source buffer and index it.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;

use super::buffer::{rms, AudioBuffer};
use super::features::{CorpusStats, FeatureVector};
use super::mfcc::{FeatureExtractor, MfccConfig};
use crate::corpus::CorpusIndex;
use crate::error::{MosaicError, Result};

pub struct CorpusIndexer {
    extractor: FeatureExtractor,
}

/// A fully built corpus: the source it was analyzed from, its index and stats.
#[derive(Clone, Debug)]
pub struct Corpus {
    pub buffer: Arc<AudioBuffer>,
    pub index: CorpusIndex,
    pub stats: CorpusStats,
}

impl CorpusIndexer {
    pub fn new(config: MfccConfig) -> Result<Self> {
        Ok(Self {
            extractor: FeatureExtractor::new(config)?,
        })
    }

    /// Analyze every hop of `buffer`, z-normalize the vectors and index them.
    ///
    /// The returned stats are the ones the target side must normalize with.
    pub fn build(&self, buffer: &AudioBuffer, hop_size: usize) -> Result<(CorpusIndex, CorpusStats)> {
        if hop_size == 0 {
            return Err(MosaicError::InvalidConfig("hop size must be positive".into()));
        }
        if buffer.is_empty() {
            return Err(MosaicError::EmptyBuffer);
        }
        if buffer.sample_rate != self.extractor.config().sample_rate {
            log::warn!(
                "Corpus sample rate {}Hz differs from analysis rate {}Hz",
                buffer.sample_rate,
                self.extractor.config().sample_rate
            );
        }

        let frame_size = self.extractor.frame_size();
        let nbr_hops = buffer.len().div_ceil(hop_size);

        log::info!("Corpus: extracting {} hops (frame={}, hop={})...", nbr_hops, frame_size, hop_size);
        let frames: Vec<(FeatureVector, f32)> = (0..nbr_hops)
            .into_par_iter()
            .map(|hop| {
                let frame = buffer.frame_at(hop * hop_size, frame_size);
                (self.extractor.extract(&frame), rms(&frame))
            })
            .collect();

        let (mut features, frame_rms): (Vec<FeatureVector>, Vec<f32>) = frames.into_iter().unzip();
        let stats = CorpusStats::from_frames(&features, &frame_rms);
        if stats.has_degenerate_dims() {
            log::warn!("Corpus has feature dimensions with zero spread; they normalize to 0");
        }

        features.par_iter_mut().for_each(|v| stats.normalize(v));

        let sample_rate = buffer.sample_rate as f64;
        let offsets: Vec<f64> = (0..nbr_hops)
            .map(|hop| (hop * hop_size) as f64 / sample_rate)
            .collect();

        log::info!(
            "Corpus: {} entries, rms range {:.4}..{:.4}",
            offsets.len(),
            stats.min_rms,
            stats.max_rms
        );

        Ok((CorpusIndex::new(offsets, features), stats))
    }

    /// Run [`build`](Self::build) on a worker thread. The result only becomes
    /// visible once it is complete.
    pub fn spawn(config: MfccConfig, buffer: Arc<AudioBuffer>, hop_size: usize) -> PendingCorpus {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = CorpusIndexer::new(config)
                .and_then(|indexer| indexer.build(&buffer, hop_size))
                .map(|(index, stats)| Corpus { buffer, index, stats });
            // The receiver may have been dropped if the source was replaced again.
            let _ = tx.send(result);
        });
        PendingCorpus { rx }
    }
}

/// Handle on a corpus being built in the background.
pub struct PendingCorpus {
    rx: Receiver<Result<Corpus>>,
}

impl PendingCorpus {
    /// Non-blocking: `None` while the build is still running.
    pub fn try_take(&self) -> Option<Result<Corpus>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(MosaicError::InvalidConfig(
                "corpus worker exited without a result".into(),
            ))),
        }
    }

    pub fn wait(self) -> Result<Corpus> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(MosaicError::InvalidConfig(
                "corpus worker exited without a result".into(),
            ))
        })
    }
}
