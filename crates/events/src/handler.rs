/// Decide and apply a command in place (no IO, no persistence).
///
/// Runs `handle` to obtain the events, then `apply`s each of them. A rejected
/// command leaves the aggregate untouched. The persistent path (load stream,
/// optimistic append, publish) lives in the infra crate's `CommandDispatcher`;
/// this helper is for domain tests and in-memory workflows.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockcount_core::Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
