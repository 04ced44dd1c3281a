/// Ledger economics
///
/// Coins only enter the system as validator rewards and only leave it as
/// transaction costs. There is no transfer transaction.
///
/// Cost of creating a poll
pub const POLL_COST: u64 = 10;

/// Cost of issuing one voting ticket
pub const TICKET_COST: u64 = 1;

/// Fixed part of the validator reward
pub const BASE_BLOCK_REWARD: u64 = 10;

/// One extra coin for every this many transactions in the block
pub const TRANSACTIONS_PER_BONUS_COIN: u64 = 4;

/// Upper bound on pending transactions handed out as block candidates
pub const MAX_PENDING_TRANSACTIONS: usize = 256;

/// Reward credited to the validator of a block with `transaction_count` transactions
pub fn block_reward(transaction_count: usize) -> u64 {
    BASE_BLOCK_REWARD + transaction_count as u64 / TRANSACTIONS_PER_BONUS_COIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_reward_floors_bonus() {
        assert_eq!(block_reward(0), 10);
        assert_eq!(block_reward(3), 10);
        assert_eq!(block_reward(4), 11);
        assert_eq!(block_reward(9), 12);
    }
}
