mod collection_changes;
mod lifecycle;
mod object_changes;
