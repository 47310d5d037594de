//! Wrapped IDNA token ABI
//!
//! Uses alloy's sol! macro to generate bindings for the BEP20 contract the
//! bridge mints into and users burn from.

use alloy::sol;

sol! {
    /// Wrapped IDNA on BNB Smart Chain
    #[sol(rpc)]
    contract WrappedIdena {
        /// Mint to a user; callable by the bridge wallet only
        function mint(address to, uint256 amount) external;

        /// Burn tokens, naming the Idena address (hex, no 0x) that receives DNA
        function burn(uint256 amount, string destination) external;

        /// Standard ERC20 transfer; burns emit it with `to` = zero address
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}
