//! Find the blocks of a scan window that carry transactions.

use crate::rpc::{self, LedgerClient};

/// The blocks a scan pass has to visit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanWindow {
    /// Exclusive lower bound, the cursor the window was computed from.
    pub from_height: u64,
    /// Inclusive upper bound.
    pub ceiling: u64,
    /// Heights in `(from_height, ceiling]` with at least one transaction,
    /// ascending.
    pub heights: Vec<u64>,
}

impl ScanWindow {
    /// True if there is nothing new to scan.
    pub fn is_empty(&self) -> bool {
        self.from_height >= self.ceiling
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BlockRangeLocator {
    reorg_margin: u64,
    header_batch_size: u64,
}

impl BlockRangeLocator {
    pub fn new(reorg_margin: u64, header_batch_size: u64) -> Self {
        Self {
            reorg_margin,
            header_batch_size: header_batch_size.max(1),
        }
    }

    /// Highest height a pass may scan, given the daemon's chain height.
    pub fn ceiling(&self, chain_height: u64) -> u64 {
        chain_height.saturating_sub(self.reorg_margin)
    }

    pub fn locate(
        &self,
        client: &impl LedgerClient,
        from_height: u64,
        chain_height: u64,
    ) -> Result<ScanWindow, rpc::Error> {
        let ceiling = self.ceiling(chain_height);
        let mut window = ScanWindow {
            from_height,
            ceiling,
            heights: Vec::new(),
        };
        if window.is_empty() {
            return Ok(window);
        }

        let mut start = from_height + 1;
        while start <= ceiling {
            let end = ceiling.min(start.saturating_add(self.header_batch_size - 1));
            let headers = client.header_range(start, end)?;
            tracing::debug!(start, end, headers = headers.len(), "Fetched block headers");

            for header in headers {
                if header.height < start || header.height > end {
                    return Err(rpc::Error::Protocol(
                        "get_block_headers_range".into(),
                        format!(
                            "header for height {} outside requested range {start}..={end}",
                            header.height
                        ),
                    ));
                }
                if header.tx_count > 0 {
                    window.heights.push(header.height);
                }
            }

            start = end + 1;
        }

        // The batcher relies on ascending heights.
        window.heights.sort_unstable();
        window.heights.dedup();

        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{BlockHeaderSummary, MockLedgerClient};

    fn headers(start: u64, end: u64, with_txs: &[u64]) -> Vec<BlockHeaderSummary> {
        (start..=end)
            .map(|height| BlockHeaderSummary {
                height,
                tx_count: if with_txs.contains(&height) { 2 } else { 0 },
            })
            .collect()
    }

    #[test]
    fn test_ceiling_saturates() {
        let locator = BlockRangeLocator::new(1, 1000);
        assert_eq!(locator.ceiling(100), 99);
        assert_eq!(locator.ceiling(0), 0);
        assert_eq!(BlockRangeLocator::new(10, 1000).ceiling(3), 0);
    }

    #[test]
    fn test_empty_window_makes_no_requests() {
        let mut mock = MockLedgerClient::new();
        mock.expect_header_range().never();

        let locator = BlockRangeLocator::new(1, 1000);
        let window = locator.locate(&mock, 99, 100).unwrap();
        assert!(window.is_empty());
        assert!(window.heights.is_empty());
        assert_eq!(window.ceiling, 99);

        // A cursor above the ceiling (daemon behind the index) is also empty.
        let window = locator.locate(&mock, 150, 100).unwrap();
        assert!(window.is_empty());
    }

    #[test]
    fn test_only_heights_with_transactions() {
        let mut mock = MockLedgerClient::new();
        mock.expect_header_range()
            .withf(|start, end| *start == 1 && *end == 99)
            .times(1)
            .returning(|start, end| Ok(headers(start, end, &[3, 17, 98])));

        let locator = BlockRangeLocator::new(1, 1000);
        let window = locator.locate(&mock, 0, 100).unwrap();
        assert_eq!(window.heights, vec![3, 17, 98]);
        assert_eq!(window.from_height, 0);
        assert_eq!(window.ceiling, 99);
    }

    #[test]
    fn test_range_split_into_batches() {
        let mut mock = MockLedgerClient::new();
        mock.expect_header_range()
            .times(3)
            .returning(|start, end| {
                assert!(end - start < 4);
                Ok(headers(start, end, &[5, 9, 10]))
            });

        let locator = BlockRangeLocator::new(0, 4);
        let window = locator.locate(&mock, 0, 10).unwrap();
        assert_eq!(window.heights, vec![5, 9, 10]);
    }

    #[test]
    fn test_out_of_range_header_is_protocol_error() {
        let mut mock = MockLedgerClient::new();
        mock.expect_header_range()
            .returning(|_, _| Ok(headers(500, 500, &[500])));

        let locator = BlockRangeLocator::new(1, 1000);
        assert!(matches!(
            locator.locate(&mock, 0, 100),
            Err(rpc::Error::Protocol(..))
        ));
    }

    #[test]
    fn test_errors_propagate() {
        let mut mock = MockLedgerClient::new();
        mock.expect_header_range()
            .times(1)
            .returning(|_, _| Err(rpc::Error::Transient("x".into(), "timeout".into())));

        let locator = BlockRangeLocator::new(1, 1000);
        assert!(locator.locate(&mock, 0, 100).unwrap_err().should_retry());
    }
}
