//! Running aggregates carried by every node of the cluster tree

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};

/// Exact sum and count of the payloads under a node
///
/// Updated incrementally while nodes are merged; the average is derived on read.
/// Serializes as `{sum, count, avg}`; `avg` is ignored when deserializing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Aggregate {
    sum: f64,
    count: u64,
}

impl Aggregate {
    /// Aggregate of a single original point
    #[inline]
    pub fn of_payload(payload: f64) -> Self {
        Self {
            sum: payload,
            count: 1,
        }
    }

    /// Fold another aggregate into this one
    #[inline]
    pub fn absorb(&mut self, other: &Aggregate) {
        self.sum += other.sum;
        self.count += other.count;
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of original points represented
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean of the payloads, `0.0` for an empty aggregate
    #[inline]
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for Aggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Aggregate", 3)?;
        state.serialize_field("sum", &self.sum)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("avg", &self.avg())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aggregate() {
        let agg = Aggregate::default();
        assert_eq!(agg.count(), 0);
        assert_eq!(agg.sum(), 0.0);
        assert_eq!(agg.avg(), 0.0);
    }

    #[test]
    fn test_absorb_points() {
        let mut agg = Aggregate::of_payload(100.0);
        agg.absorb(&Aggregate::of_payload(200.0));
        agg.absorb(&Aggregate::of_payload(300.0));

        assert_eq!(agg.count(), 3);
        assert_eq!(agg.sum(), 600.0);
        assert_eq!(agg.avg(), 200.0);
    }

    #[test]
    fn test_absorb_nested_aggregates() {
        let mut left = Aggregate::of_payload(1.0);
        left.absorb(&Aggregate::of_payload(2.0));
        let mut right = Aggregate::of_payload(3.0);
        right.absorb(&Aggregate::of_payload(6.0));

        left.absorb(&right);
        assert_eq!(left.count(), 4);
        assert_eq!(left.sum(), 12.0);
        assert_eq!(left.avg(), 3.0);
    }

    #[test]
    fn test_avg_is_not_rounded() {
        let mut agg = Aggregate::of_payload(1.0);
        agg.absorb(&Aggregate::of_payload(2.0));
        agg.absorb(&Aggregate::of_payload(2.0));
        assert_eq!(agg.avg(), 5.0 / 3.0);
    }
}
