use alloy::primitives::{Address, U256};
use tracing::{debug, info, instrument};

use crate::{
    contract::{BuyerContract, ContractReader},
    error::{BuyerQuery, GenesisError},
};

/// One presale purchase as recorded on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerRecord {
    pub address: Address,
    pub value: U256,
}

/// Walk the contract's buyer array from index 0 until it returns the zero address.
///
/// Each buyer costs two queries plus one for the terminating read. The sentinel index
/// is not part of the result. A contract still answering with non-zero addresses at
/// index `max_buyers` fails with [`GenesisError::EnumerationOverflow`].
#[instrument(name = "read_buyers", skip_all, fields(max_buyers = max_buyers))]
pub async fn read_buyers<R: ContractReader>(
    contract: &BuyerContract<R>,
    max_buyers: u64,
) -> Result<Vec<BuyerRecord>, GenesisError> {
    let mut buyers = Vec::new();
    let mut cursor = 0u64;

    loop {
        let address = contract
            .buyer_address(cursor)
            .await
            .map_err(|source| GenesisError::ContractRead {
                cursor,
                query: BuyerQuery::Address,
                source,
            })?;
        if address == Address::ZERO {
            break;
        }
        if cursor >= max_buyers {
            return Err(GenesisError::EnumerationOverflow { limit: max_buyers });
        }

        let value = contract
            .buyer_value(address)
            .await
            .map_err(|source| GenesisError::ContractRead {
                cursor,
                query: BuyerQuery::Value,
                source,
            })?;
        debug!(index = cursor, %address, %value, "buyer");
        buyers.push(BuyerRecord { address, value });
        cursor += 1;
    }

    info!("read {} buyers", buyers.len());
    Ok(buyers)
}

#[cfg(test)]
mod test {
    use alloy::eips::BlockId;

    use super::*;
    use crate::{
        contract::testing::{buyer_interface, StubReader},
        error::CallError,
    };

    fn buyer(n: u8) -> (Address, U256) {
        (Address::with_last_byte(n), U256::from(n as u64 * 1000))
    }

    fn presale(reader: StubReader) -> BuyerContract<StubReader> {
        BuyerContract::new(
            Address::with_last_byte(0xaa),
            buyer_interface(),
            BlockId::latest(),
            reader,
        )
    }

    #[tokio::test]
    async fn reads_buyers_in_index_order() {
        for n in [0u8, 1, 2, 7] {
            let onchain: Vec<_> = (1..=n).map(buyer).collect();
            let contract = presale(StubReader::new(onchain.clone()));

            let buyers = read_buyers(&contract, 1_000).await.unwrap();

            let expected: Vec<_> = onchain
                .into_iter()
                .map(|(address, value)| BuyerRecord { address, value })
                .collect();
            assert_eq!(buyers, expected);
            // two queries per buyer plus the sentinel read
            assert_eq!(contract.reader().calls(), 2 * n as usize + 1);
        }
    }

    #[tokio::test]
    async fn empty_list_is_not_an_error() {
        let contract = presale(StubReader::new(vec![]));
        let buyers = read_buyers(&contract, 1_000).await.unwrap();
        assert!(buyers.is_empty());
        assert_eq!(contract.reader().calls(), 1);
    }

    #[tokio::test]
    async fn guard_stops_endless_contract() {
        let contract = presale(StubReader::endless());
        let err = read_buyers(&contract, 5).await.unwrap_err();
        assert!(matches!(err, GenesisError::EnumerationOverflow { limit: 5 }));
        assert_eq!(contract.reader().calls(), 2 * 5 + 1);
    }

    #[tokio::test]
    async fn list_exactly_at_the_limit_is_accepted() {
        let contract = presale(StubReader::new((1..=3).map(buyer).collect()));
        let buyers = read_buyers(&contract, 3).await.unwrap();
        assert_eq!(buyers.len(), 3);
    }

    #[tokio::test]
    async fn failed_query_is_fatal() {
        let contract = presale(
            StubReader::new((1..=4).map(buyer).collect()).failing(BuyerQuery::Address, 2),
        );
        let err = read_buyers(&contract, 1_000).await.unwrap_err();
        assert!(matches!(
            err,
            GenesisError::ContractRead {
                cursor: 2,
                query: BuyerQuery::Address,
                source: CallError::Transport(_),
            }
        ));
        // aborts immediately, no partial result and no further calls
        assert_eq!(contract.reader().calls(), 5);

        let contract = presale(
            StubReader::new((1..=4).map(buyer).collect()).failing(BuyerQuery::Value, 1),
        );
        let err = read_buyers(&contract, 1_000).await.unwrap_err();
        assert!(matches!(
            err,
            GenesisError::ContractRead {
                cursor: 1,
                query: BuyerQuery::Value,
                ..
            }
        ));
    }
}
