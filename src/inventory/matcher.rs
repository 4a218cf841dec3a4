use crate::inventory::criterion::Criterion;
use crate::inventory::resource::Resource;

/// Whether `resource` satisfies `criterion`.
///
/// Every scalar field the criterion sets must equal the resource's field
/// exactly (case-sensitive), and the criterion's tags must be a subset of the
/// resource's tags.
pub fn matches<R: Resource + ?Sized>(criterion: &Criterion, resource: &R) -> bool {
    if let Some(id) = criterion.id() {
        if id != resource.id() {
            return false;
        }
    }
    if let Some(name) = criterion.name() {
        if name != resource.name() {
            return false;
        }
    }
    if let Some(version) = criterion.version() {
        if version != resource.version() {
            return false;
        }
    }
    if let Some(status) = criterion.status() {
        if status != resource.status() {
            return false;
        }
    }
    criterion.tags().is_subset(resource.tags())
}

/// Filters `resources` down to those matching `criterion`, ordered by
/// ascending id.
///
/// When `default_status` is given and the criterion does not constrain the
/// status, the default is substituted before matching.
pub fn find_matching_resources<'a, R, I>(
    criterion: &Criterion,
    resources: I,
    default_status: Option<&str>,
) -> Vec<&'a R>
where
    R: Resource + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let effective = match default_status {
        Some(status) => criterion.with_default_status(status),
        None => criterion.clone(),
    };

    let mut matched: Vec<&R> = resources
        .into_iter()
        .filter(|r| matches(&effective, *r))
        .collect();
    matched.sort_by(|a, b| a.id().cmp(b.id()));
    matched
}
