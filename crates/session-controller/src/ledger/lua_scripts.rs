//! Lua scripts for atomic ledger mutations in Redis.
//!
//! Each script reads the balance, computes the new value and appends the
//! transaction record in a single server-side step, so concurrent debits for
//! the same user cannot interleave and lose an update.
//!
//! Lua numbers returned to Redis are truncated to integers, so scripts return
//! balances as strings and the client parses them.

/// Credit a user's balance and record the top-up.
///
/// Arguments:
/// - KEYS[1]: Balance key (`ledger:{user}:balance`)
/// - KEYS[2]: Transactions list key (`ledger:{user}:transactions`)
/// - ARGV[1]: Minutes to add (positive decimal)
/// - ARGV[2]: Transaction record (JSON)
///
/// Returns:
/// - New balance as a string
/// - Error reply if ARGV[1] is not a positive number
pub const TOP_UP: &str = r#"
local minutes = tonumber(ARGV[1])
if minutes == nil or minutes <= 0 then
    return redis.error_reply('invalid amount')
end

local current = tonumber(redis.call('GET', KEYS[1]) or '0') or 0
local updated = current + minutes

redis.call('SET', KEYS[1], tostring(updated))
redis.call('LPUSH', KEYS[2], ARGV[2])
return tostring(updated)
"#;

/// Debit a user's balance, clamped at zero.
///
/// The record's `amount_minutes` is rewritten to the negative of the amount
/// actually deducted. Nothing is appended when the deduction is zero.
///
/// Arguments:
/// - KEYS[1]: Balance key
/// - KEYS[2]: Transactions list key
/// - ARGV[1]: Minutes requested (non-negative decimal)
/// - ARGV[2]: Transaction record template (JSON)
///
/// Returns:
/// - `{deducted, balance}` as strings
pub const DEBIT_CLAMPED: &str = r#"
local minutes = tonumber(ARGV[1])
if minutes == nil or minutes < 0 then
    return redis.error_reply('invalid amount')
end

local current = tonumber(redis.call('GET', KEYS[1]) or '0') or 0
if current < 0 then
    current = 0
end

local deducted = math.min(current, minutes)
local updated = current - deducted

if deducted > 0 then
    local record = cjson.decode(ARGV[2])
    record['amount_minutes'] = -deducted
    redis.call('SET', KEYS[1], tostring(updated))
    redis.call('LPUSH', KEYS[2], cjson.encode(record))
end

return {tostring(deducted), tostring(updated)}
"#;

/// Append a record without touching the balance (non-billed sessions).
///
/// Arguments:
/// - KEYS[1]: Transactions list key
/// - ARGV[1]: Transaction record (JSON)
///
/// Returns:
/// - New list length
pub const APPEND_RECORD: &str = r#"
return redis.call('LPUSH', KEYS[1], ARGV[1])
"#;
