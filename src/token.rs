/// A lightweight handle identifying one registration with a [`Selector`](crate::Selector).
///
/// Tokens are opaque to the loop itself; it only ever compares and hashes
/// them. Callers are free to pack whatever numbering scheme suits them
/// (a slab index, a counter, a pointer cast) into the inner `usize`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    #[inline]
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    #[inline]
    fn from(val: Token) -> usize {
        val.0
    }
}