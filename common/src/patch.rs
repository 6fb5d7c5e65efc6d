use crate::{PIXEL_COUNT, error::LedError, pixel::Pixel, store::Snapshot};
use serde::{Deserialize, Serialize};

/// A request to set one pixel. Positions outside the strip are tolerated
/// and dropped when merged.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Patch {
    pub position: i64,
    pub colour: String,
}

impl Patch {
    pub fn new(position: i64, pixel: Pixel) -> Self {
        Self {
            position,
            colour: pixel.to_string(),
        }
    }
}

/// One patch per position, all set to `pixel`.
pub fn fill(pixel: Pixel) -> Vec<Patch> {
    (0..PIXEL_COUNT as i64)
        .map(|position| Patch::new(position, pixel))
        .collect()
}

/// Merges `patches` over `current`, later patches winning.
///
/// Every colour is parsed before anything is merged, so a single malformed
/// colour rejects the whole set, including ones aimed at dropped positions.
pub fn merge(current: &Snapshot, patches: &[Patch]) -> Result<Snapshot, LedError> {
    let parsed = patches
        .iter()
        .map(|patch| Ok((patch.position, patch.colour.parse::<Pixel>()?)))
        .collect::<Result<Vec<_>, LedError>>()?;

    let mut next = *current;
    for (position, pixel) in parsed {
        match usize::try_from(position)
            .ok()
            .and_then(|slot| next.get_mut(slot))
        {
            Some(slot) => *slot = pixel,
            None => debug!(position, "dropping out-of-range patch"),
        }
    }

    debug!(input = ?current, output = ?next, "merged patches");

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(position: i64, colour: &str) -> Patch {
        Patch {
            position,
            colour: colour.into(),
        }
    }

    #[test]
    fn sets_single_position() {
        let start = [Pixel::OFF; PIXEL_COUNT];
        let next = merge(&start, &[patch(3, "#ff00ff80")]).unwrap();

        for (position, pixel) in next.iter().enumerate() {
            if position == 3 {
                assert_eq!(*pixel, Pixel::new(0xff, 0x00, 0xff, 0x80));
            } else {
                assert_eq!(*pixel, Pixel::OFF);
            }
        }
    }

    #[test]
    fn drops_out_of_range_positions() {
        let start = [Pixel::new(1, 2, 3, 4); PIXEL_COUNT];
        for position in [-1, 8, 9, i64::MIN, i64::MAX] {
            let next = merge(&start, &[patch(position, "#ffffffff")]).unwrap();
            assert_eq!(next, start, "position {position}");
        }
    }

    #[test]
    fn malformed_colour_rejects_whole_set() {
        let start = [Pixel::OFF; PIXEL_COUNT];
        let err = merge(&start, &[patch(0, "#ffffffff"), patch(2, "zz")]).unwrap_err();
        assert!(matches!(err, LedError::Validation(_)));
    }

    #[test]
    fn malformed_colour_at_dropped_position_still_rejects() {
        let start = [Pixel::OFF; PIXEL_COUNT];
        let err = merge(&start, &[patch(12, "nope")]).unwrap_err();
        assert!(matches!(err, LedError::Validation(_)));
    }

    #[test]
    fn last_write_wins_within_set() {
        let start = [Pixel::OFF; PIXEL_COUNT];
        let next = merge(&start, &[patch(5, "#ff000027"), patch(5, "#0000ff27")]).unwrap();
        assert_eq!(next[5], Pixel::new(0, 0, 0xff, 0x27));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let start = [Pixel::OFF; PIXEL_COUNT];
        let patches = [patch(0, "#102030ff"), patch(7, "#a0b0c040"), patch(9, "#ffffffff")];

        let once = merge(&start, &patches).unwrap();
        let twice = merge(&once, &patches).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn fill_covers_every_position() {
        let red = Pixel::new(0xff, 0, 0, 0x27);
        let next = merge(&[Pixel::OFF; PIXEL_COUNT], &fill(red)).unwrap();
        assert_eq!(next, [red; PIXEL_COUNT]);
    }
}
