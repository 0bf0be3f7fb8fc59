//! Pixel format negotiation between a decoder and the hardware behind it.
//!
//! When a decoder opens, it offers the pixel formats it can output, best
//! first. A [`FormatSelector`] picks one of them, or declines. Selection is a
//! pure policy: it knows nothing about the pipeline and can be swapped without
//! touching it.

/// Chooses a decoder output format from the offered list.
pub trait FormatSelector<F> {
    /// Returns the chosen format, or `None` if none of `offered` is acceptable.
    fn select(&self, offered: &[F]) -> Option<F>;
}

impl<F, P> FormatSelector<F> for P
where
    P: Fn(&[F]) -> Option<F>,
{
    #[inline]
    fn select(&self, offered: &[F]) -> Option<F> {
        self(offered)
    }
}

/// Picks the first entry of an ordered preference list that the decoder offers.
///
/// The order of the preference list wins over the order of the offer, so
/// `[DRM_PRIME, NV12]` yields DRM_PRIME whenever it is offered at all and
/// falls back to NV12 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceList<F> {
    preferred: Vec<F>,
}

impl<F> PreferenceList<F> {
    /// Creates a selector from formats in descending preference.
    #[inline]
    pub fn new(preferred: impl IntoIterator<Item = F>) -> Self {
        Self {
            preferred: preferred.into_iter().collect(),
        }
    }

    /// The formats in descending preference.
    #[inline]
    pub fn preferred(&self) -> &[F] {
        &self.preferred
    }
}

impl<F: PartialEq + Copy> FormatSelector<F> for PreferenceList<F> {
    #[inline]
    fn select(&self, offered: &[F]) -> Option<F> {
        self.preferred
            .iter()
            .find(|format| offered.contains(format))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fmt {
        DrmPrime,
        Nv12,
        Yuv420p,
    }

    #[test]
    fn preference_order_wins_over_offer_order() {
        let list = PreferenceList::new([Fmt::DrmPrime, Fmt::Nv12]);
        assert_eq!(list.select(&[Fmt::Nv12, Fmt::DrmPrime]), Some(Fmt::DrmPrime));
    }

    #[test]
    fn falls_back_to_later_preference() {
        let list = PreferenceList::new([Fmt::DrmPrime, Fmt::Nv12]);
        assert_eq!(list.select(&[Fmt::Yuv420p, Fmt::Nv12]), Some(Fmt::Nv12));
    }

    #[test]
    fn declines_when_nothing_matches() {
        let list = PreferenceList::new([Fmt::DrmPrime, Fmt::Nv12]);
        assert_eq!(list.select(&[Fmt::Yuv420p]), None);
        assert_eq!(list.select(&[]), None);
    }

    #[test]
    fn closures_are_selectors() {
        let first = |offered: &[Fmt]| offered.first().copied();
        assert_eq!(first.select(&[Fmt::Yuv420p, Fmt::Nv12]), Some(Fmt::Yuv420p));
    }
}
