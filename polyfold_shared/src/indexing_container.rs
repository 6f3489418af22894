use std::{
    collections::VecDeque,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// Generational index into an [`IndexingContainer`].
///
/// A `Handle` stays valid until the element it points to is removed. Afterwards the slot might be
/// reused but the old `Handle` won't resolve to the new element because the generation differs.
pub struct Handle<T> {
    index: usize,
    generation: usize,
    phantom_data: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize, generation: usize) -> Self {
        Self {
            index,
            generation,
            phantom_data: PhantomData,
        }
    }

    /// Returns the index of the handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the generation of the handle.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

// Implemented by hand so that `T` doesn't have to implement the traits.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Arena that hands out [`Handle`]s for the inserted elements.
pub struct IndexingContainer<T> {
    data: Vec<Option<T>>,
    generations: Vec<usize>,
    free_list: VecDeque<usize>,
}

impl<T> Default for IndexingContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexingContainer<T> {
    /// Creates a new empty container.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            generations: Vec::new(),
            free_list: VecDeque::new(),
        }
    }

    /// Inserts a new element into the container.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(free_index) = self.free_list.pop_front() {
            self.data[free_index] = Some(value);
            Handle::new(free_index, self.generations[free_index])
        } else {
            let index = self.data.len();
            self.data.push(Some(value));
            self.generations.push(0);
            Handle::new(index, 0)
        }
    }

    /// Removes the element at the given handle and returns it.
    pub fn remove(&mut self, handle: &Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        self.generations[handle.index()] += 1;
        self.free_list.push_back(handle.index());
        self.data[handle.index()].take()
    }

    /// Returns a reference to the element at the given handle.
    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        if self.is_valid(handle) {
            self.data[handle.index()].as_ref()
        } else {
            None
        }
    }

    /// Returns a mutable reference to the element at the given handle.
    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        if self.is_valid(handle) {
            self.data[handle.index()].as_mut()
        } else {
            None
        }
    }

    /// Returns `true` if the handle still points to an element.
    pub fn is_valid(&self, handle: &Handle<T>) -> bool {
        self.generations
            .get(handle.index())
            .map_or(false, |generation| *generation == handle.generation())
            && self.data[handle.index()].is_some()
    }

    /// Iterates over the handles and elements that are currently stored.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.as_ref().map(|value| (Handle::new(index, self.generations[index]), value)))
    }

    /// Returns the number of elements in the container.
    pub fn len(&self) -> usize {
        self.data.len() - self.free_list.len()
    }

    /// Returns `true` if the container holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots that can be reused without reallocating.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}
