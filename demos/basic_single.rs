use tokenkv::store::single::TokenCache;

fn main() {
    let mut cache: TokenCache<u64, String> = TokenCache::new(4);

    let token = cache.insert(1, 42, "alpha".to_string());
    println!("inserted 42 -> {:#018x}", token.raw());

    if let Some(value) = cache.get(token) {
        println!("get by token: {value}");
    }

    let found = cache.find_handle(&42);
    println!("find_handle matches? {}", found == token);

    cache.erase(token);
    println!("get after erase: {:?}", cache.get(token));

    let reused = cache.insert(1, 43, "beta".to_string());
    println!("position reused? {}", reused.position() == token.position());
    println!("stale token still dead? {}", cache.get(token).is_none());
}

// Expected output:
// inserted 42 -> 0x0100000100000000
// get by token: alpha
// find_handle matches? true
// get after erase: None
// position reused? true
// stale token still dead? true
//
// Explanation: erase advances the slot generation, so the old token fails
// validation even though the position is immediately reused for key 43.
