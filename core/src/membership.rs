//! Per-user collections: favorites, shopping cart and author subscriptions.
//!
//! All three share one engine. A collection kind decides which entity the
//! target id points at and whether an owner may add themselves. The store's
//! uniqueness constraint on `(owner_id, target_id, kind)` is the source of
//! truth for "already a member"; the lookup before insert only saves a write
//! in the common case.

use anyhow::Result;
use tracing::{debug, info};

use crate::error::MembershipError;
use crate::models::{CollectionKind, MembershipRecord, TargetType};

/// Existence checks for collection targets.
pub trait EntityLookup {
    fn entity_exists(&self, target: TargetType, id: i64) -> Result<bool>;
}

/// Result of an insert attempt, after the store has applied its constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(MembershipRecord),
    /// A record for the same `(owner, target, kind)` already exists.
    Duplicate,
    /// The store rejected an owner pointing at themselves.
    SelfReference,
}

/// Durable keyed set of membership records.
pub trait MembershipStore {
    fn find_membership(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<Option<MembershipRecord>>;

    fn insert_membership(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<InsertOutcome>;

    /// Deletes records matching exactly `(owner, target, kind)` and returns
    /// how many went away.
    fn delete_membership(&self, owner_id: i64, target_id: i64, kind: CollectionKind)
    -> Result<usize>;

    /// Target ids in one owner's collection, oldest membership first.
    fn membership_targets(&self, owner_id: i64, kind: CollectionKind) -> Result<Vec<i64>>;
}

/// Stateless add/remove over a [`MembershipStore`].
pub struct MembershipEngine<'a, S> {
    store: &'a S,
}

impl<'a, S> MembershipEngine<'a, S>
where
    S: MembershipStore + EntityLookup,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Put `target_id` into the owner's `kind` collection.
    pub fn add(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<MembershipRecord, MembershipError> {
        if kind.forbids_self_reference() && owner_id == target_id {
            debug!(owner_id, target_id, %kind, "rejected self-reference");
            return Err(MembershipError::SelfReference { kind });
        }

        let target = kind.target_type();
        if !self.store.entity_exists(target, target_id)? {
            debug!(owner_id, target_id, %kind, "target missing");
            return Err(MembershipError::TargetNotFound {
                target,
                id: target_id,
            });
        }

        if self
            .store
            .find_membership(owner_id, target_id, kind)?
            .is_some()
        {
            debug!(owner_id, target_id, %kind, "membership already present");
            return Err(MembershipError::AlreadyExists { kind });
        }

        match self.store.insert_membership(owner_id, target_id, kind)? {
            InsertOutcome::Inserted(record) => {
                info!(owner_id, target_id, %kind, "membership added");
                Ok(record)
            }
            InsertOutcome::Duplicate => {
                // Lost a race with a concurrent add for the same pair.
                debug!(owner_id, target_id, %kind, "insert hit uniqueness constraint");
                Err(MembershipError::AlreadyExists { kind })
            }
            InsertOutcome::SelfReference => Err(MembershipError::SelfReference { kind }),
        }
    }

    /// Take `target_id` out of the owner's `kind` collection.
    pub fn remove(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<(), MembershipError> {
        let deleted = self.store.delete_membership(owner_id, target_id, kind)?;
        if deleted == 0 {
            debug!(owner_id, target_id, %kind, "nothing to remove");
            return Err(MembershipError::NotFound { kind });
        }
        info!(owner_id, target_id, %kind, "membership removed");
        Ok(())
    }

    pub fn contains(
        &self,
        owner_id: i64,
        target_id: i64,
        kind: CollectionKind,
    ) -> Result<bool, MembershipError> {
        Ok(self
            .store
            .find_membership(owner_id, target_id, kind)?
            .is_some())
    }

    pub fn targets(&self, owner_id: i64, kind: CollectionKind) -> Result<Vec<i64>, MembershipError> {
        Ok(self.store.membership_targets(owner_id, kind)?)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::db::Database;
    use crate::models::{NewIngredient, NewRecipe, NewRecipeIngredient, NewUser};

    struct Fixture {
        db: Database,
        alice: i64,
        bob: i64,
        recipe: i64,
    }

    fn new_user(db: &Database, name: &str) -> i64 {
        db.insert_user(
            &NewUser {
                email: format!("{name}@example.com"),
                username: name.to_string(),
                first_name: name.to_string(),
                last_name: "Tester".to_string(),
            },
            None,
        )
        .unwrap()
        .id
    }

    fn seed(db: &Database) -> (i64, i64, i64) {
        let alice = new_user(db, "alice");
        let bob = new_user(db, "bob");
        let tag = db.insert_tag("Dinner", "dinner").unwrap();
        let flour = db
            .insert_ingredient(&NewIngredient {
                name: "Flour".to_string(),
                measurement_unit: "g".to_string(),
            })
            .unwrap()
            .unwrap();
        let recipe = db
            .create_recipe(
                bob,
                &NewRecipe {
                    name: "Bread".to_string(),
                    text: "Bake it.".to_string(),
                    cooking_time: 60,
                    tags: vec![tag.id],
                    ingredients: vec![NewRecipeIngredient {
                        ingredient_id: flour.id,
                        amount: 500,
                    }],
                },
            )
            .unwrap();
        (alice, bob, recipe.id)
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, recipe) = seed(&db);
        Fixture {
            db,
            alice,
            bob,
            recipe,
        }
    }

    fn count(db: &Database, owner: i64, target: i64, kind: CollectionKind) -> usize {
        usize::from(db.find_membership(owner, target, kind).unwrap().is_some())
    }

    #[test]
    fn test_add_twice_conflicts() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        for (kind, target) in [
            (CollectionKind::Favorite, f.recipe),
            (CollectionKind::Cart, f.recipe),
            (CollectionKind::Subscription, f.bob),
        ] {
            let record = engine.add(f.alice, target, kind).unwrap();
            assert_eq!(record.owner_id, f.alice);
            assert_eq!(record.target_id, target);
            assert_eq!(record.kind, kind);

            let err = engine.add(f.alice, target, kind).unwrap_err();
            assert!(matches!(err, MembershipError::AlreadyExists { kind: k } if k == kind));
            assert_eq!(count(&f.db, f.alice, target, kind), 1);
            assert_eq!(engine.targets(f.alice, kind).unwrap(), vec![target]);
        }
    }

    #[test]
    fn test_add_then_remove_then_remove_again() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        engine
            .add(f.alice, f.bob, CollectionKind::Subscription)
            .unwrap();
        engine
            .remove(f.alice, f.bob, CollectionKind::Subscription)
            .unwrap();
        assert_eq!(count(&f.db, f.alice, f.bob, CollectionKind::Subscription), 0);

        let err = engine
            .remove(f.alice, f.bob, CollectionKind::Subscription)
            .unwrap_err();
        assert!(matches!(err, MembershipError::NotFound { .. }));
    }

    #[test]
    fn test_remove_only_touches_matching_record() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        engine.add(f.alice, f.recipe, CollectionKind::Favorite).unwrap();
        engine.add(f.bob, f.recipe, CollectionKind::Favorite).unwrap();
        engine.add(f.alice, f.recipe, CollectionKind::Cart).unwrap();

        engine
            .remove(f.alice, f.recipe, CollectionKind::Favorite)
            .unwrap();

        assert_eq!(count(&f.db, f.alice, f.recipe, CollectionKind::Favorite), 0);
        assert_eq!(count(&f.db, f.bob, f.recipe, CollectionKind::Favorite), 1);
        assert_eq!(count(&f.db, f.alice, f.recipe, CollectionKind::Cart), 1);
    }

    #[test]
    fn test_self_subscription_always_rejected() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        for _ in 0..2 {
            let err = engine
                .add(f.alice, f.alice, CollectionKind::Subscription)
                .unwrap_err();
            assert!(matches!(err, MembershipError::SelfReference { .. }));
        }
        engine
            .add(f.alice, f.bob, CollectionKind::Subscription)
            .unwrap();
        let err = engine
            .add(f.alice, f.alice, CollectionKind::Subscription)
            .unwrap_err();
        assert!(matches!(err, MembershipError::SelfReference { .. }));
        assert_eq!(
            count(&f.db, f.alice, f.alice, CollectionKind::Subscription),
            0
        );
    }

    #[test]
    fn test_favorite_own_recipe_is_allowed() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);
        // bob wrote the recipe
        assert!(engine.add(f.bob, f.recipe, CollectionKind::Favorite).is_ok());
        assert!(engine.add(f.bob, f.recipe, CollectionKind::Cart).is_ok());
    }

    #[test]
    fn test_missing_target() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        let err = engine
            .add(f.alice, 9999, CollectionKind::Favorite)
            .unwrap_err();
        assert!(matches!(
            err,
            MembershipError::TargetNotFound {
                target: TargetType::Recipe,
                id: 9999
            }
        ));

        let err = engine
            .add(f.alice, 9999, CollectionKind::Subscription)
            .unwrap_err();
        assert!(matches!(
            err,
            MembershipError::TargetNotFound {
                target: TargetType::User,
                ..
            }
        ));
        assert!(engine.targets(f.alice, CollectionKind::Favorite).unwrap().is_empty());
    }

    #[test]
    fn test_kinds_are_independent() {
        let f = fixture();
        let engine = MembershipEngine::new(&f.db);

        engine.add(f.alice, f.recipe, CollectionKind::Favorite).unwrap();
        assert!(
            !engine
                .contains(f.alice, f.recipe, CollectionKind::Cart)
                .unwrap()
        );

        engine.add(f.alice, f.recipe, CollectionKind::Cart).unwrap();
        engine
            .remove(f.alice, f.recipe, CollectionKind::Cart)
            .unwrap();
        assert!(
            engine
                .contains(f.alice, f.recipe, CollectionKind::Favorite)
                .unwrap()
        );
    }

    /// A store whose lookup never sees existing rows, so every add reaches
    /// the insert and relies on the constraint.
    struct BlindStore {
        inner: Database,
        inserts: RefCell<usize>,
    }

    impl EntityLookup for BlindStore {
        fn entity_exists(&self, target: TargetType, id: i64) -> Result<bool> {
            self.inner.entity_exists(target, id)
        }
    }

    impl MembershipStore for BlindStore {
        fn find_membership(
            &self,
            _owner_id: i64,
            _target_id: i64,
            _kind: CollectionKind,
        ) -> Result<Option<MembershipRecord>> {
            Ok(None)
        }

        fn insert_membership(
            &self,
            owner_id: i64,
            target_id: i64,
            kind: CollectionKind,
        ) -> Result<InsertOutcome> {
            *self.inserts.borrow_mut() += 1;
            self.inner.insert_membership(owner_id, target_id, kind)
        }

        fn delete_membership(
            &self,
            owner_id: i64,
            target_id: i64,
            kind: CollectionKind,
        ) -> Result<usize> {
            self.inner.delete_membership(owner_id, target_id, kind)
        }

        fn membership_targets(&self, owner_id: i64, kind: CollectionKind) -> Result<Vec<i64>> {
            self.inner.membership_targets(owner_id, kind)
        }
    }

    #[test]
    fn test_constraint_violation_becomes_already_exists() {
        let f = fixture();
        let store = BlindStore {
            inner: f.db,
            inserts: RefCell::new(0),
        };
        let engine = MembershipEngine::new(&store);

        engine.add(f.alice, f.recipe, CollectionKind::Cart).unwrap();
        let err = engine
            .add(f.alice, f.recipe, CollectionKind::Cart)
            .unwrap_err();

        assert!(matches!(err, MembershipError::AlreadyExists { .. }));
        assert_eq!(*store.inserts.borrow(), 2);
        assert_eq!(
            store
                .membership_targets(f.alice, CollectionKind::Cart)
                .unwrap(),
            vec![f.recipe]
        );
    }

    #[test]
    fn test_store_check_constraint_rejects_self_subscription() {
        let f = fixture();
        let outcome = f
            .db
            .insert_membership(f.alice, f.alice, CollectionKind::Subscription)
            .unwrap();
        assert_eq!(outcome, InsertOutcome::SelfReference);
    }

    #[test]
    fn test_concurrent_double_add_persists_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("potluck.db");
        let (alice, _bob, recipe) = {
            let db = Database::open(&path).unwrap();
            seed(&db)
        };

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                thread::spawn(move || {
                    let db = Database::open(&path).unwrap();
                    let engine = MembershipEngine::new(&db);
                    barrier.wait();
                    engine.add(alice, recipe, CollectionKind::Favorite)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(MembershipError::AlreadyExists { .. })))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 1);

        let db = Database::open(&path).unwrap();
        assert_eq!(
            db.membership_targets(alice, CollectionKind::Favorite)
                .unwrap(),
            vec![recipe]
        );
    }
}
