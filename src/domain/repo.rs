//! Users, rooms and the membership relation between them.
//!
//! Both directions of the relation live in one struct behind one lock, so a
//! reader can never see a room that lists a user whose own index lacks it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{normalize_name, Room, RoomParticipation, User, DEFAULT_ROOM};
use super::error::RegistryError;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, Arc<User>>,
    rooms: HashMap<String, Arc<Room>>,

    user_to_rooms: HashMap<String, Vec<Arc<Room>>>,
    room_to_users: HashMap<String, Vec<Arc<User>>>,
}

impl Inner {
    fn user(&self, name: &str) -> Result<Arc<User>, RegistryError> {
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownUser(name.to_owned()))
    }

    fn room(&self, name: &str) -> Result<Arc<Room>, RegistryError> {
        self.rooms
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRoom(name.to_owned()))
    }

    fn join(&mut self, user: &Arc<User>, room: &Arc<Room>) {
        let rooms = self.user_to_rooms.entry(user.name.clone()).or_default();
        if !rooms.iter().any(|r| Arc::ptr_eq(r, room)) {
            rooms.push(room.clone());
        }

        let users = self.room_to_users.entry(room.name.clone()).or_default();
        if !users.iter().any(|u| Arc::ptr_eq(u, user)) {
            users.push(user.clone());
        }
    }

    fn leave(&mut self, user: &Arc<User>, room: &Arc<Room>) {
        if let Some(rooms) = self.user_to_rooms.get_mut(&user.name) {
            rooms.retain(|r| !Arc::ptr_eq(r, room));
        }
        if let Some(users) = self.room_to_users.get_mut(&room.name) {
            users.retain(|u| !Arc::ptr_eq(u, user));
        }
    }
}

/// In-process membership registry.
///
/// Writers take the lock exclusively for the whole operation, readers share it.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.rooms.insert(
            DEFAULT_ROOM.to_owned(),
            Arc::new(Room {
                name: DEFAULT_ROOM.to_owned(),
                creator: None,
            }),
        );

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn create_user(&self, name: &str) -> Result<Arc<User>, RegistryError> {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        if inner.users.contains_key(&name) {
            return Err(RegistryError::DuplicateUser(name));
        }

        let user = Arc::new(User { name: name.clone() });
        inner.users.insert(name, user.clone());
        Ok(user)
    }

    /// Returns the user with this name, creating it if needed. The flag is
    /// `true` when this call created the record.
    pub fn find_or_create_user(&self, name: &str) -> (Arc<User>, bool) {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        if let Some(user) = inner.users.get(&name) {
            return (user.clone(), false);
        }

        let user = Arc::new(User { name: name.clone() });
        inner.users.insert(name, user.clone());
        (user, true)
    }

    /// Makes the user leave every room it joined, then forgets it.
    pub fn remove_user(&self, name: &str) -> Result<(), RegistryError> {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        let user = inner.user(&name)?;

        for room in inner.user_to_rooms.remove(&name).unwrap_or_default() {
            if let Some(users) = inner.room_to_users.get_mut(&room.name) {
                users.retain(|u| !Arc::ptr_eq(u, &user));
            }
        }
        inner.users.remove(&name);
        Ok(())
    }

    pub fn find_user(&self, name: &str) -> Option<Arc<User>> {
        self.inner.read().users.get(&normalize_name(name)).cloned()
    }

    pub fn find_room(&self, name: &str) -> Option<Arc<Room>> {
        self.inner.read().rooms.get(&normalize_name(name)).cloned()
    }

    /// Creates a room and makes its creator the first participant.
    pub fn create_room(&self, room_name: &str, creator_name: &str) -> Result<Arc<Room>, RegistryError> {
        let room_name = normalize_name(room_name);
        let mut inner = self.inner.write();
        let creator = inner.user(&normalize_name(creator_name))?;
        if inner.rooms.contains_key(&room_name) {
            return Err(RegistryError::DuplicateRoom(room_name));
        }

        let room = Arc::new(Room {
            name: room_name.clone(),
            creator: Some(creator.name.clone()),
        });
        inner.rooms.insert(room_name, room.clone());
        inner.join(&creator, &room);
        Ok(room)
    }

    pub fn join_room(&self, user_name: &str, room_name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let user = inner.user(&normalize_name(user_name))?;
        let room = inner.room(&normalize_name(room_name))?;
        inner.join(&user, &room);
        Ok(())
    }

    pub fn leave_room(&self, user_name: &str, room_name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let user = inner.user(&normalize_name(user_name))?;
        let room = inner.room(&normalize_name(room_name))?;
        inner.leave(&user, &room);
        Ok(())
    }

    pub fn list_rooms(&self) -> Vec<Arc<Room>> {
        self.inner.read().rooms.values().cloned().collect()
    }

    pub fn list_participants(&self, room_name: &str) -> Result<Vec<Arc<User>>, RegistryError> {
        let inner = self.inner.read();
        let room = inner.room(&normalize_name(room_name))?;
        Ok(inner.room_to_users.get(&room.name).cloned().unwrap_or_default())
    }

    pub fn list_participants_for_all_rooms(&self) -> Vec<RoomParticipation> {
        let inner = self.inner.read();
        inner
            .rooms
            .values()
            .map(|room| RoomParticipation {
                room: room.clone(),
                participants: inner.room_to_users.get(&room.name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Rooms the user has joined, in join order.
    pub fn list_user_rooms(&self, user_name: &str) -> Result<Vec<Arc<Room>>, RegistryError> {
        let inner = self.inner.read();
        let user = inner.user(&normalize_name(user_name))?;
        Ok(inner.user_to_rooms.get(&user.name).cloned().unwrap_or_default())
    }
}
