use std::time::Instant;

/// A step of the sequential reference model: apply one operation to the model
/// state, returning the successor state and the result the operation should
/// have observed.
pub type SequentialOp<Seq, V> = fn(&Seq, Option<V>) -> (Seq, Option<V>);

/// One completed concurrent operation: its real-time interval, its observed
/// result, and the model step it claims to correspond to.
pub struct Operation<Seq, V> {
    pub invoked: Instant,
    pub returned: Instant,
    pub label: String,
    pub sequential: SequentialOp<Seq, V>,
    pub argument: Option<V>,
    pub result: Option<V>,
}
